use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::auth::{get_token, revoke_token, AuthUser, BasicAuthUser};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::routes::db_error;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::post().to(issue))
            .route(web::delete().to(revoke)),
    );
}

#[derive(Serialize)]
struct TokenDto {
    token: String,
}

async fn issue(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    BasicAuthUser(user): BasicAuthUser,
) -> Result<HttpResponse, AppError> {
    let token = get_token(db.get_ref(), &user, config.token_expires_in)
        .await
        .map_err(db_error("issue token"))?;
    Ok(HttpResponse::Ok().json(TokenDto { token }))
}

async fn revoke(db: web::Data<DatabaseConnection>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    revoke_token(db.get_ref(), auth.user_id)
        .await
        .map_err(db_error("revoke token"))?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use crate::test_support::{bearer, TestCtx};
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::Value;

    fn basic(username: &str, password: &str) -> (actix_web::http::header::HeaderName, String) {
        (AUTHORIZATION, format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password))))
    }

    #[actix_web::test]
    async fn basic_credentials_yield_the_live_token() {
        let ctx = TestCtx::new().await;
        let (_, token) = ctx.user_with_password("rosa", "clave").await;
        let app = test_app!(ctx);

        let req = TestRequest::post().uri("/api/tokens").insert_header(basic("rosa", "clave")).to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["token"], token.as_str());

        let req = TestRequest::post().uri("/api/tokens").insert_header(basic("rosa", "otra")).to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["error"], "Unauthorized");

        let req = TestRequest::post().uri("/api/tokens").to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);
    }

    #[actix_web::test]
    async fn revoked_token_is_refused() {
        let ctx = TestCtx::new().await;
        let (user, token) = ctx.user("rosa").await;
        let app = test_app!(ctx);

        let req = TestRequest::delete().uri("/api/tokens").insert_header(bearer(&token)).to_request();
        assert_eq!(call_service(&app, req).await.status(), 204);

        let req = TestRequest::get()
            .uri(&format!("/api/users/{}", user.id))
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);
    }
}
