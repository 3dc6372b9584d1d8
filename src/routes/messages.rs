use actix_web::{web, HttpResponse};
use chrono::{SecondsFormat, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthUser;
use crate::entity::{message, user};
use crate::error::AppError;
use crate::pagination::{to_collection_dict, PageQuery};
use crate::routes::db_error;
use crate::social::{self, UNREAD_MESSAGE_COUNT};

const BODY_MAX_CHARS: usize = 140;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(inbox))
            .route(web::post().to(send)),
    );
}

#[derive(Deserialize)]
struct SendRequest {
    recipient_id: Option<i32>,
    body: Option<String>,
}

#[derive(Serialize)]
struct MessageDto {
    id: i32,
    sender_id: i32,
    recipient_id: i32,
    body: String,
    timestamp: String,
}

fn to_dto(model: message::Model) -> MessageDto {
    MessageDto {
        id: model.id,
        sender_id: model.sender_id,
        recipient_id: model.recipient_id,
        body: model.body,
        timestamp: model.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

/// Stores the message and refreshes the recipient's unread counter.
async fn send(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<SendRequest>,
) -> Result<HttpResponse, AppError> {
    let data = payload.into_inner();
    let (Some(recipient_id), Some(body)) = (data.recipient_id, data.body) else {
        return Err(AppError::bad_request("must include recipient_id and body fields"));
    };
    if body.trim().is_empty() || body.chars().count() > BODY_MAX_CHARS {
        return Err(AppError::bad_request("body must be between 1 and 140 characters"));
    }
    let recipient = user::Entity::find_by_id(recipient_id)
        .one(db.get_ref())
        .await
        .map_err(db_error("find recipient"))?
        .ok_or_else(AppError::not_found)?;

    let txn = db.get_ref().begin().await.map_err(db_error("begin"))?;
    let model = message::ActiveModel {
        sender_id: Set(auth.user_id),
        recipient_id: Set(recipient.id),
        body: Set(body),
        timestamp: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(db_error("insert message"))?;
    let unread = social::new_messages(&txn, &recipient)
        .await
        .map_err(db_error("count new messages"))?;
    social::add_notification(&txn, recipient.id, UNREAD_MESSAGE_COUNT, &json!(unread))
        .await
        .map_err(db_error("add notification"))?;
    txn.commit().await.map_err(db_error("commit"))?;

    Ok(HttpResponse::Created().json(to_dto(model)))
}

/// Marks the inbox as read and returns received messages, newest first.
async fn inbox(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let txn = db.get_ref().begin().await.map_err(db_error("begin"))?;
    user::ActiveModel {
        id: Set(auth.user_id),
        last_message_read_time: Set(Some(Utc::now())),
        ..Default::default()
    }
    .update(&txn)
    .await
    .map_err(db_error("mark messages read"))?;
    social::add_notification(&txn, auth.user_id, UNREAD_MESSAGE_COUNT, &json!(0))
        .await
        .map_err(db_error("reset unread count"))?;
    txn.commit().await.map_err(db_error("commit"))?;

    let page = to_collection_dict(
        db.get_ref(),
        social::received_messages(auth.user_id),
        query.page(),
        query.per_page(),
        "/api/messages",
        &[],
    )
    .await
    .map_err(db_error("list messages"))?;
    Ok(HttpResponse::Ok().json(page.map(to_dto)))
}

#[cfg(test)]
mod tests {
    use crate::social::{notifications_since, UNREAD_MESSAGE_COUNT};
    use crate::test_support::{bearer, TestCtx};
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use serde_json::{json, Value};

    async fn unread_count(ctx: &TestCtx, user_id: i32) -> Option<Value> {
        notifications_since(&ctx.db, user_id, 0.0)
            .await
            .unwrap()
            .into_iter()
            .find(|n| n.name == UNREAD_MESSAGE_COUNT)
            .map(|n| n.get_data())
    }

    #[actix_web::test]
    async fn sending_bumps_unread_and_reading_resets_it() {
        let ctx = TestCtx::new().await;
        let (_, ana_token) = ctx.user("ana").await;
        let (beto, beto_token) = ctx.user("beto").await;
        let app = test_app!(ctx);

        for body in ["hola", "que tal"] {
            let req = TestRequest::post()
                .uri("/api/messages")
                .insert_header(bearer(&ana_token))
                .set_json(json!({"recipient_id": beto.id, "body": body}))
                .to_request();
            assert_eq!(call_service(&app, req).await.status(), 201);
        }
        assert_eq!(unread_count(&ctx, beto.id).await, Some(json!(2)));

        let req = TestRequest::get()
            .uri("/api/messages")
            .insert_header(bearer(&beto_token))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["_meta"]["total_items"], 2);
        assert_eq!(body["items"][0]["body"], "que tal");
        assert_eq!(unread_count(&ctx, beto.id).await, Some(json!(0)));

        let req = TestRequest::post()
            .uri("/api/messages")
            .insert_header(bearer(&ana_token))
            .set_json(json!({"recipient_id": beto.id, "body": "otra"}))
            .to_request();
        call_service(&app, req).await;
        assert_eq!(unread_count(&ctx, beto.id).await, Some(json!(1)));
    }

    #[actix_web::test]
    async fn rejects_unknown_recipient_and_bad_body() {
        let ctx = TestCtx::new().await;
        let (ana, token) = ctx.user("ana").await;
        let app = test_app!(ctx);

        let req = TestRequest::post()
            .uri("/api/messages")
            .insert_header(bearer(&token))
            .set_json(json!({"recipient_id": 404, "body": "hola"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 404);

        let req = TestRequest::post()
            .uri("/api/messages")
            .insert_header(bearer(&token))
            .set_json(json!({"recipient_id": ana.id, "body": "x".repeat(141)}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 400);

        let req = TestRequest::post()
            .uri("/api/messages")
            .insert_header(bearer(&token))
            .set_json(json!({"body": "sin destino"}))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), 400);
    }
}
