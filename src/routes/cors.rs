use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::header::{HeaderName, HeaderValue, AUTHORIZATION},
    http::Method,
    middleware::Next,
    web, Error, HttpResponse,
};

use crate::config::AppConfig;

const BASE_ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, Authorization";

/// Answers preflight requests itself and stamps CORS headers on every reply.
/// A custom token header is added to the allowed headers.
pub async fn cors_handler<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error>
where
    B: MessageBody,
{
    let allow_headers = match req.app_data::<web::Data<AppConfig>>() {
        Some(cfg) if !cfg.token_header.eq_ignore_ascii_case(AUTHORIZATION.as_str()) => {
            HeaderValue::from_str(&format!("{}, {}", BASE_ALLOW_HEADERS, cfg.token_header))
                .unwrap_or_else(|_| HeaderValue::from_static(BASE_ALLOW_HEADERS))
        }
        _ => HeaderValue::from_static(BASE_ALLOW_HEADERS),
    };

    let mut res = if req.method() == Method::OPTIONS {
        let res = HttpResponse::Ok().finish().map_into_right_body();
        req.into_response(res)
    } else {
        next.call(req).await?.map_into_left_body()
    };

    let headers = res.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("POST, PUT, GET, OPTIONS, DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("86400"),
    );
    headers.insert(HeaderName::from_static("access-control-allow-headers"), allow_headers);
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );

    Ok(res)
}
