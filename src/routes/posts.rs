use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::entity::post;
use crate::error::AppError;
use crate::pagination::{to_collection_dict, Collection, PageQuery};
use crate::permission::{user_can, Permission};
use crate::routes::{created, db_error, map_commit_error};
use crate::search::{reindex, search, SearchIndex};
use crate::session::{CommitHooks, Session};
use crate::social;

const BODY_MAX_CHARS: usize = 140;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(create)))
        .service(web::resource("/feed").route(web::get().to(feed)))
        .service(web::resource("/search").route(web::get().to(search_posts)))
        .service(web::resource("/reindex").route(web::post().to(reindex_posts)))
        .service(
            web::resource("/{id:\\d+}")
                .route(web::get().to(get))
                .route(web::put().to(update))
                .route(web::delete().to(delete)),
        );
}

#[derive(Deserialize)]
struct PostRequest {
    body: Option<String>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    #[serde(flatten)]
    paging: PageQuery,
}

#[derive(Serialize)]
pub struct PostDto {
    id: i32,
    body: String,
    timestamp: String,
    language: Option<String>,
    user_id: i32,
}

pub fn to_post_dto(model: post::Model) -> PostDto {
    PostDto {
        id: model.id,
        body: model.body,
        timestamp: model.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        language: model.language,
        user_id: model.user_id,
    }
}

fn check_body(body: Option<String>) -> Result<String, AppError> {
    let body = body.unwrap_or_default();
    let len = body.trim().chars().count();
    if len == 0 || body.chars().count() > BODY_MAX_CHARS {
        return Err(AppError::bad_request("body must be between 1 and 140 characters"));
    }
    Ok(body)
}

async fn create(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    auth: AuthUser,
    payload: web::Json<PostRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let body = check_body(data.body)?;

    let mut session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let model = post::ActiveModel {
        body: Set(body),
        timestamp: Set(Utc::now()),
        user_id: Set(auth.user_id),
        language: Set(data.language),
        ..Default::default()
    }
    .insert(&*session)
    .await
    .map_err(db_error("insert post"))?;
    session.added(&model);
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(created(format!("/api/posts/{}", model.id), &to_post_dto(model)))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    _auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let model = find(db.get_ref(), *path).await?;
    Ok(HttpResponse::Ok().json(to_post_dto(model)))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    auth: AuthUser,
    path: web::Path<i32>,
    payload: web::Json<PostRequest>,
) -> Result<HttpResponse, AppError> {
    let current = find(db.get_ref(), *path).await?;
    if current.user_id != auth.user_id {
        return Err(AppError::forbidden());
    }
    let data = payload.into_inner();

    let mut session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    let mut active: post::ActiveModel = current.into();
    if data.body.is_some() {
        active.body = Set(check_body(data.body)?);
    }
    if let Some(language) = data.language {
        active.language = Set(Some(language));
    }
    let model = active.update(&*session).await.map_err(db_error("update post"))?;
    session.updated(&model);
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(HttpResponse::Ok().json(to_post_dto(model)))
}

async fn delete(
    db: web::Data<DatabaseConnection>,
    hooks: web::Data<CommitHooks>,
    auth: AuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let current = find(db.get_ref(), *path).await?;
    if current.user_id != auth.user_id {
        return Err(AppError::forbidden());
    }

    let mut session = Session::begin(db.get_ref()).await.map_err(db_error("begin"))?;
    session.deleted(&current);
    current.delete(&*session).await.map_err(db_error("delete post"))?;
    session.commit(&hooks).await.map_err(map_commit_error)?;

    Ok(HttpResponse::NoContent().finish())
}

async fn feed(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let page = to_collection_dict(
        db.get_ref(),
        social::followed_posts(auth.user_id),
        query.page(),
        query.per_page(),
        "/api/posts/feed",
        &[],
    )
    .await
    .map_err(db_error("feed"))?;
    Ok(HttpResponse::Ok().json(page.map(to_post_dto)))
}

async fn search_posts(
    db: web::Data<DatabaseConnection>,
    index: web::Data<dyn SearchIndex>,
    _auth: AuthUser,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::bad_request("must include a q parameter"))?;
    let (page, per_page) = (query.paging.page(), query.paging.per_page());
    let (rows, total) = search::<post::Model, _>(db.get_ref(), index.get_ref(), q, page, per_page).await?;
    let items = rows.into_iter().map(to_post_dto).collect();
    let extra = [("q", q.to_string())];
    Ok(HttpResponse::Ok().json(Collection::new(items, page, per_page, total, "/api/posts/search", &extra)))
}

async fn reindex_posts(
    db: web::Data<DatabaseConnection>,
    index: web::Data<dyn SearchIndex>,
    auth: AuthUser,
) -> Result<HttpResponse, AppError> {
    let allowed = user_can(db.get_ref(), &auth.user, Permission::ADMIN)
        .await
        .map_err(db_error("permission check"))?;
    if !allowed {
        return Err(AppError::forbidden());
    }
    let indexed = reindex::<post::Model, _>(db.get_ref(), index.get_ref()).await?;
    Ok(HttpResponse::Ok().json(json!({ "indexed": indexed })))
}

async fn find<C: ConnectionTrait>(db: &C, id: i32) -> Result<post::Model, AppError> {
    post::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error("find post"))?
        .ok_or_else(AppError::not_found)
}
