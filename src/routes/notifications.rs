use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::entity::notification;
use crate::error::AppError;
use crate::routes::db_error;
use crate::social;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::get().to(list)));
}

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<String>,
}

#[derive(Serialize)]
struct NotificationDto {
    name: String,
    data: Value,
    timestamp: f64,
}

fn to_dto(model: notification::Model) -> NotificationDto {
    NotificationDto {
        data: model.get_data(),
        name: model.name,
        timestamp: model.timestamp,
    }
}

/// Notifications newer than `since` (epoch seconds), oldest first.
async fn list(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<SinceQuery>,
) -> Result<HttpResponse, AppError> {
    let since = query
        .since
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let rows = social::notifications_since(db.get_ref(), auth.user_id, since)
        .await
        .map_err(db_error("list notifications"))?;
    let items: Vec<NotificationDto> = rows.into_iter().map(to_dto).collect();
    Ok(HttpResponse::Ok().json(items))
}

#[cfg(test)]
mod tests {
    use crate::social::{add_notification, epoch_seconds};
    use crate::test_support::{bearer, TestCtx};
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn filters_by_since_and_owner() {
        let ctx = TestCtx::new().await;
        let (ana, token) = ctx.user("ana").await;
        let (beto, _) = ctx.user("beto").await;
        add_notification(&ctx.db, ana.id, "task_progress", &json!({"progress": 10})).await.unwrap();
        add_notification(&ctx.db, beto.id, "task_progress", &json!({"progress": 99})).await.unwrap();
        let app = test_app!(ctx);

        let req = TestRequest::get().uri("/api/notifications").insert_header(bearer(&token)).to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "task_progress");
        assert_eq!(body[0]["data"]["progress"], 10);

        let req = TestRequest::get()
            .uri(&format!("/api/notifications?since={}", epoch_seconds() + 60.0))
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body, json!([]));

        let req = TestRequest::get().uri("/api/notifications").to_request();
        assert_eq!(call_service(&app, req).await.status(), 401);
    }
}
