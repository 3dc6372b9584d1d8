use chrono::Utc;
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Select, Set,
};
use serde_json::Value;

use crate::entity::{followers, message, notification, post, user};

pub const UNREAD_MESSAGE_COUNT: &str = "unread_message_count";

pub async fn is_following<C: ConnectionTrait>(db: &C, follower_id: i32, followed_id: i32) -> Result<bool, DbErr> {
    let edge = followers::Entity::find_by_id((follower_id, followed_id)).one(db).await?;
    Ok(edge.is_some())
}

pub async fn follow<C: ConnectionTrait>(db: &C, follower_id: i32, followed_id: i32) -> Result<(), DbErr> {
    if !is_following(db, follower_id, followed_id).await? {
        followers::ActiveModel {
            follower_id: Set(follower_id),
            followed_id: Set(followed_id),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

pub async fn unfollow<C: ConnectionTrait>(db: &C, follower_id: i32, followed_id: i32) -> Result<(), DbErr> {
    followers::Entity::delete_by_id((follower_id, followed_id)).exec(db).await?;
    Ok(())
}

/// Users following `user_id`.
pub fn followers_of(user_id: i32) -> Select<user::Entity> {
    user::Entity::find()
        .filter(
            user::Column::Id.in_subquery(
                Query::select()
                    .column(followers::Column::FollowerId)
                    .from(followers::Entity)
                    .and_where(followers::Column::FollowedId.eq(user_id))
                    .to_owned(),
            ),
        )
        .order_by_asc(user::Column::Id)
}

/// Users `user_id` follows.
pub fn followed_by(user_id: i32) -> Select<user::Entity> {
    user::Entity::find()
        .filter(
            user::Column::Id.in_subquery(
                Query::select()
                    .column(followers::Column::FollowedId)
                    .from(followers::Entity)
                    .and_where(followers::Column::FollowerId.eq(user_id))
                    .to_owned(),
            ),
        )
        .order_by_asc(user::Column::Id)
}

/// Posts by followed users plus the user's own, newest first.
pub fn followed_posts(user_id: i32) -> Select<post::Entity> {
    post::Entity::find()
        .filter(
            Condition::any()
                .add(
                    post::Column::UserId.in_subquery(
                        Query::select()
                            .column(followers::Column::FollowedId)
                            .from(followers::Entity)
                            .and_where(followers::Column::FollowerId.eq(user_id))
                            .to_owned(),
                    ),
                )
                .add(post::Column::UserId.eq(user_id)),
        )
        .order_by_desc(post::Column::Timestamp)
        .order_by_desc(post::Column::Id)
}

pub fn posts_of(user_id: i32) -> Select<post::Entity> {
    post::Entity::find()
        .filter(post::Column::UserId.eq(user_id))
        .order_by_desc(post::Column::Timestamp)
        .order_by_desc(post::Column::Id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCounts {
    pub posts: u64,
    pub followers: u64,
    pub followed: u64,
}

pub async fn user_counts<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<UserCounts, DbErr> {
    let posts = post::Entity::find()
        .filter(post::Column::UserId.eq(user_id))
        .count(db)
        .await?;
    let followers = followers::Entity::find()
        .filter(followers::Column::FollowedId.eq(user_id))
        .count(db)
        .await?;
    let followed = followers::Entity::find()
        .filter(followers::Column::FollowerId.eq(user_id))
        .count(db)
        .await?;
    Ok(UserCounts { posts, followers, followed })
}

/// Messages received since the user last opened the inbox.
pub async fn new_messages<C: ConnectionTrait>(db: &C, user: &user::Model) -> Result<u64, DbErr> {
    let mut query = message::Entity::find().filter(message::Column::RecipientId.eq(user.id));
    if let Some(last_read) = user.last_message_read_time {
        query = query.filter(message::Column::Timestamp.gt(last_read));
    }
    query.count(db).await
}

pub fn received_messages(user_id: i32) -> Select<message::Entity> {
    message::Entity::find()
        .filter(message::Column::RecipientId.eq(user_id))
        .order_by_desc(message::Column::Timestamp)
        .order_by_desc(message::Column::Id)
}

/// Replaces the user's notification called `name` with a fresh one.
pub async fn add_notification<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    name: &str,
    data: &Value,
) -> Result<notification::Model, DbErr> {
    notification::Entity::delete_many()
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::Name.eq(name))
        .exec(db)
        .await?;
    notification::ActiveModel {
        name: Set(name.to_string()),
        user_id: Set(user_id),
        timestamp: Set(epoch_seconds()),
        payload_json: Set(data.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn notifications_since<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    since: f64,
) -> Result<Vec<notification::Model>, DbErr> {
    notification::Entity::find()
        .filter(notification::Column::UserId.eq(user_id))
        .filter(notification::Column::Timestamp.gt(since))
        .order_by_asc(notification::Column::Timestamp)
        .all(db)
        .await
}

pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
