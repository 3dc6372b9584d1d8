use actix_web::{http::header::LOCATION, web, HttpResponse};
use serde::Serialize;

use crate::error::AppError;
use crate::session::CommitError;

pub mod cors;
pub mod instituciones;
pub mod messages;
pub mod notifications;
pub mod password;
pub mod posts;
pub mod tasks;
pub mod titulos;
pub mod tokens;
pub mod users;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::scope("/instituciones").configure(instituciones::config))
            .service(web::scope("/titulos").configure(titulos::config))
            .service(web::scope("/users").configure(users::config))
            .service(web::scope("/tokens").configure(tokens::config))
            .service(web::scope("/posts").configure(posts::config))
            .service(web::scope("/messages").configure(messages::config))
            .service(web::scope("/notifications").configure(notifications::config))
            .service(web::scope("/tasks").configure(tasks::config))
            .configure(password::config),
    );
}

pub(crate) fn created<T: Serialize>(location: String, body: &T) -> HttpResponse {
    HttpResponse::Created().insert_header((LOCATION, location)).json(body)
}

pub(crate) fn map_commit_error(err: CommitError) -> AppError {
    AppError::internal("commit", err)
}

pub(crate) fn db_error(context: &'static str) -> impl Fn(sea_orm::DbErr) -> AppError {
    move |e| AppError::internal(context, e)
}
