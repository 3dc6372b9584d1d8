use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use md5::{Digest, Md5};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, AuthUser};
use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;
use crate::pagination::{to_collection_dict, Collection, PageQuery};
use crate::permission::role_for_new_user;
use crate::routes::posts::to_post_dto;
use crate::routes::{created, db_error};
use crate::social;

const ABOUT_ME_MAX_CHARS: usize = 140;
const AVATAR_SIZE: u32 = 128;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::put().to(update)),
    )
    .service(web::resource("/{id:\\d+}/followers").route(web::get().to(followers)))
    .service(web::resource("/{id:\\d+}/followed").route(web::get().to(followed)))
    .service(
        web::resource("/{id:\\d+}/follow")
            .route(web::post().to(follow))
            .route(web::delete().to(unfollow)),
    )
    .service(web::resource("/{id:\\d+}/posts").route(web::get().to(posts)));
}

#[derive(Deserialize)]
struct UserRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    about_me: Option<String>,
}

#[derive(Serialize)]
struct UserLinks {
    #[serde(rename = "self")]
    self_link: String,
    followers: String,
    followed: String,
    avatar: String,
}

#[derive(Serialize)]
pub struct UserDto {
    id: i32,
    username: String,
    last_seen: Option<String>,
    about_me: Option<String>,
    post_count: u64,
    follower_count: u64,
    followed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(rename = "_links")]
    links: UserLinks,
}

pub fn avatar(email: &str, size: u32) -> String {
    let digest = format!("{:x}", Md5::digest(email.to_lowercase().as_bytes()));
    format!("https://www.gravatar.com/avatar/{}?d=identicon&s={}", digest, size)
}

/// Serializes a user as seen by `viewer_id`; the email is only shown to its owner.
pub(crate) async fn to_user_dto<C: ConnectionTrait>(
    db: &C,
    model: user::Model,
    viewer_id: i32,
) -> Result<UserDto, AppError> {
    let counts = social::user_counts(db, model.id)
        .await
        .map_err(db_error("user counts"))?;
    let links = UserLinks {
        self_link: format!("/api/users/{}", model.id),
        followers: format!("/api/users/{}/followers", model.id),
        followed: format!("/api/users/{}/followed", model.id),
        avatar: avatar(&model.email, AVATAR_SIZE),
    };
    Ok(UserDto {
        id: model.id,
        last_seen: model
            .last_seen
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        about_me: model.about_me,
        post_count: counts.posts,
        follower_count: counts.followers,
        followed_count: counts.followed,
        email: (model.id == viewer_id).then_some(model.email),
        username: model.username,
        links,
    })
}

pub(crate) async fn user_page<C: ConnectionTrait>(
    db: &C,
    page: Collection<user::Model>,
    viewer_id: i32,
) -> Result<Collection<UserDto>, AppError> {
    let mut items = Vec::with_capacity(page.items.len());
    for model in page.items.iter().cloned() {
        items.push(to_user_dto(db, model, viewer_id).await?);
    }
    Ok(page.with_items(items))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    Ok(HttpResponse::Ok().json(to_user_dto(db.get_ref(), model, auth.user_id).await?))
}

async fn list(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let select = user::Entity::find().order_by_asc(user::Column::Id);
    let page = to_collection_dict(db.get_ref(), select, query.page(), query.per_page(), "/api/users", &[])
        .await
        .map_err(db_error("list users"))?;
    Ok(HttpResponse::Ok().json(user_page(db.get_ref(), page, auth.user_id).await?))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<UserRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let (Some(username), Some(email), Some(password)) = (data.username, data.email, data.password) else {
        return Err(AppError::bad_request("must include username, email and password fields"));
    };
    if taken(db.get_ref(), user::Column::Username, &username).await? {
        return Err(AppError::bad_request("please use a different username"));
    }
    if taken(db.get_ref(), user::Column::Email, &email).await? {
        return Err(AppError::bad_request("please use a different email address"));
    }
    check_about_me(data.about_me.as_deref())?;

    let role = role_for_new_user(db.get_ref(), &email, config.admin_email.as_deref())
        .await
        .map_err(db_error("role for new user"))?;
    let model = user::ActiveModel {
        username: Set(username),
        email: Set(email),
        password_hash: Set(Some(hash_password(&password)?)),
        about_me: Set(data.about_me),
        role_id: Set(role.map(|r| r.id)),
        last_seen: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await
    .map_err(db_error("insert user"))?;

    let id = model.id;
    let dto = to_user_dto(db.get_ref(), model, id).await?;
    Ok(created(format!("/api/users/{}", id), &dto))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<UserRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if auth.user_id != id {
        return Err(AppError::forbidden());
    }
    let current = auth.user;
    let data = payload.into_inner();
    if let Some(username) = &data.username {
        if *username != current.username && taken(db.get_ref(), user::Column::Username, username).await? {
            return Err(AppError::bad_request("please use a different username"));
        }
    }
    if let Some(email) = &data.email {
        if *email != current.email && taken(db.get_ref(), user::Column::Email, email).await? {
            return Err(AppError::bad_request("please use a different email address"));
        }
    }
    check_about_me(data.about_me.as_deref())?;

    let mut active: user::ActiveModel = current.into();
    if let Some(v) = data.username {
        active.username = Set(v);
    }
    if let Some(v) = data.email {
        active.email = Set(v);
    }
    if let Some(v) = data.about_me {
        active.about_me = Set(Some(v));
    }
    let model = active.update(db.get_ref()).await.map_err(db_error("update user"))?;
    Ok(HttpResponse::Ok().json(to_user_dto(db.get_ref(), model, id).await?))
}

async fn followers(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    let endpoint = format!("/api/users/{}/followers", model.id);
    let page = to_collection_dict(
        db.get_ref(),
        social::followers_of(model.id),
        query.page(),
        query.per_page(),
        &endpoint,
        &[],
    )
    .await
    .map_err(db_error("list followers"))?;
    Ok(HttpResponse::Ok().json(user_page(db.get_ref(), page, auth.user_id).await?))
}

async fn followed(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    let endpoint = format!("/api/users/{}/followed", model.id);
    let page = to_collection_dict(
        db.get_ref(),
        social::followed_by(model.id),
        query.page(),
        query.per_page(),
        &endpoint,
        &[],
    )
    .await
    .map_err(db_error("list followed"))?;
    Ok(HttpResponse::Ok().json(user_page(db.get_ref(), page, auth.user_id).await?))
}

async fn follow(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let target = find(db.get_ref(), *path).await?;
    if target.id == auth.user_id {
        return Err(AppError::bad_request("you cannot follow yourself"));
    }
    social::follow(db.get_ref(), auth.user_id, target.id)
        .await
        .map_err(db_error("follow"))?;
    Ok(HttpResponse::NoContent().finish())
}

async fn unfollow(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let target = find(db.get_ref(), *path).await?;
    if target.id == auth.user_id {
        return Err(AppError::bad_request("you cannot unfollow yourself"));
    }
    social::unfollow(db.get_ref(), auth.user_id, target.id)
        .await
        .map_err(db_error("unfollow"))?;
    Ok(HttpResponse::NoContent().finish())
}

async fn posts(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    let endpoint = format!("/api/users/{}/posts", model.id);
    let page = to_collection_dict(
        db.get_ref(),
        social::posts_of(model.id),
        query.page(),
        query.per_page(),
        &endpoint,
        &[],
    )
    .await
    .map_err(db_error("list posts of user"))?;
    Ok(HttpResponse::Ok().json(page.map(to_post_dto)))
}

async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<user::Model, AppError> {
    user::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error("find user"))?
        .ok_or_else(AppError::not_found)
}

async fn taken<C: ConnectionTrait>(db: &C, column: user::Column, value: &str) -> Result<bool, AppError> {
    let found = user::Entity::find()
        .filter(column.eq(value))
        .one(db)
        .await
        .map_err(db_error("user uniqueness"))?;
    Ok(found.is_some())
}

fn check_about_me(about_me: Option<&str>) -> Result<(), AppError> {
    match about_me {
        Some(text) if text.chars().count() > ABOUT_ME_MAX_CHARS => {
            Err(AppError::bad_request("about_me must be at most 140 characters"))
        }
        _ => Ok(()),
    }
}
