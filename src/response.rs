use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;

use crate::error::AppError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::bad_request("request body must be application/json"),
        JsonPayloadError::Deserialize(e) => AppError::bad_request(format!("invalid request body: {}", e)),
        _ => AppError::bad_request("invalid request body"),
    };
    app_err.into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    let status = err.status_code();
    HttpResponse::build(status).json(ErrorBody {
        error: status.canonical_reason().unwrap_or("Unknown error").to_string(),
        message: err.msg().map(|m| m.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn bad_request_carries_message() {
        let resp = response_from_error(&AppError::bad_request("please use a different titulo"));
        assert_eq!(resp.status(), 400);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Bad Request");
        assert_eq!(json["message"], "please use a different titulo");
    }

    #[actix_web::test]
    async fn not_found_has_no_message() {
        let resp = response_from_error(&AppError::not_found());
        assert_eq!(resp.status(), 404);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Not Found");
        assert!(json.get("message").is_none());
    }
}
