use actix_web::{web, HttpResponse};
use log::info;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{get_reset_password_token, hash_password, verify_reset_password_token, RESET_TOKEN_EXPIRES_IN};
use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;
use crate::jobs::{enqueue_job, JobQueue};
use crate::routes::db_error;

pub const RESET_EMAIL_JOB: &str = "send_password_reset_email";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/reset_password_request").route(web::post().to(request_reset)))
        .service(web::resource("/reset_password/{token}").route(web::post().to(reset)));
}

#[derive(Deserialize)]
struct ResetRequest {
    email: Option<String>,
}

#[derive(Deserialize)]
struct NewPassword {
    password: Option<String>,
}

/// Always answers 202 so the endpoint does not reveal which emails exist.
async fn request_reset(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    queue: web::Data<dyn JobQueue>,
    payload: web::Json<ResetRequest>,
) -> Result<HttpResponse, AppError> {
    let email = payload
        .into_inner()
        .email
        .ok_or_else(|| AppError::bad_request("must include email field"))?;
    let found = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db.get_ref())
        .await
        .map_err(db_error("find user by email"))?;
    if let Some(user) = found {
        let token = get_reset_password_token(&config, user.id, RESET_TOKEN_EXPIRES_IN)?;
        enqueue_job(
            queue.get_ref(),
            RESET_EMAIL_JOB,
            user.id,
            vec![Value::from(user.id), Value::from(token)],
        )
        .await
        .map_err(|e| AppError::internal("enqueue reset email", e))?;
        info!("password reset requested for user {}", user.id);
    }
    Ok(HttpResponse::Accepted().finish())
}

async fn reset(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    path: web::Path<String>,
    payload: web::Json<NewPassword>,
) -> Result<HttpResponse, AppError> {
    let user = verify_reset_password_token(db.get_ref(), &config, &path)
        .await
        .map_err(db_error("verify reset token"))?
        .ok_or_else(|| AppError::bad_request("invalid or expired reset token"))?;
    let password = payload
        .into_inner()
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("must include password field"))?;

    user::ActiveModel {
        id: Set(user.id),
        password_hash: Set(Some(hash_password(&password)?)),
        ..Default::default()
    }
    .update(db.get_ref())
    .await
    .map_err(db_error("reset password"))?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::RESET_EMAIL_JOB;
    use crate::auth::check_password;
    use crate::entity::user;
    use crate::test_support::TestCtx;
    use actix_web::test::{call_service, TestRequest};
    use sea_orm::EntityTrait;
    use serde_json::json;

    #[actix_web::test]
    async fn reset_flow_through_queued_email() {
        let ctx = TestCtx::new().await;
        let (user, _) = ctx.user_with_password("eva", "vieja").await;
        let app = test_app!(ctx);

        let req = TestRequest::post()
            .uri("/api/reset_password_request")
            .set_json(json!({"email": "eva@example.com"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 202);

        let jobs = ctx.queue.jobs_named(&format!("app.tasks.{}", RESET_EMAIL_JOB)).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user_id, user.id);
        let token = jobs[0].args[1].as_str().unwrap().to_string();

        let req = TestRequest::post()
            .uri(&format!("/api/reset_password/{}", token))
            .set_json(json!({"password": "nueva"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 204);

        let reloaded = user::Entity::find_by_id(user.id).one(&ctx.db).await.unwrap().unwrap();
        assert!(check_password(&reloaded, "nueva"));
        assert!(!check_password(&reloaded, "vieja"));
    }

    #[actix_web::test]
    async fn unknown_email_is_accepted_silently() {
        let ctx = TestCtx::new().await;
        let app = test_app!(ctx);

        let req = TestRequest::post()
            .uri("/api/reset_password_request")
            .set_json(json!({"email": "nadie@example.com"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 202);
        assert!(ctx.queue.jobs_named(&format!("app.tasks.{}", RESET_EMAIL_JOB)).await.is_empty());
    }

    #[actix_web::test]
    async fn bad_token_is_rejected() {
        let ctx = TestCtx::new().await;
        let app = test_app!(ctx);

        let req = TestRequest::post()
            .uri("/api/reset_password/not-a-token")
            .set_json(json!({"password": "x"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 400);
    }
}
