use actix_web::{http::StatusCode, ResponseError};
use log::error;
use thiserror::Error;

use crate::response::response_from_error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("system_exception")]
    System,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn need_login() -> Self {
        Self::Unauthorized
    }

    pub fn forbidden() -> Self {
        Self::Forbidden
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn system_exception() -> Self {
        Self::System
    }

    /// Logs the underlying failure and hides it behind a 500.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{} failed: {}", context, err);
        Self::System
    }

    pub fn msg(&self) -> Option<&str> {
        match self {
            Self::BadRequest(msg) => Some(msg),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        response_from_error(self)
    }
}
