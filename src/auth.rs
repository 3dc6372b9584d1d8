use actix_web::{dev::Payload, http::header::AUTHORIZATION, web, FromRequest, HttpRequest};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use rand::RngCore;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;

/// A token is reused while it has more than this many seconds left.
const TOKEN_REUSE_MARGIN_SECS: i64 = 60;
const TOKEN_BYTES: usize = 24;
pub const RESET_TOKEN_EXPIRES_IN: i64 = 600;
const BCRYPT_COST: u32 = 10;

/// The user behind a valid, unexpired bearer token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i32,
    pub user: user::Model,
}

/// The user behind valid HTTP Basic credentials.
#[derive(Clone, Debug)]
pub struct BasicAuthUser(pub user::Model);

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let db = match req.app_data::<web::Data<DatabaseConnection>>() {
            Some(db) => db.clone(),
            None => {
                return Box::pin(async { Err(AppError::system_exception().into()) });
            }
        };
        let config = match req.app_data::<web::Data<AppConfig>>() {
            Some(cfg) => cfg.clone(),
            None => {
                return Box::pin(async { Err(AppError::system_exception().into()) });
            }
        };
        let token = extract_bearer_token(req, &config);

        Box::pin(async move {
            let token = token.ok_or_else(AppError::need_login)?;
            let user = check_token(db.get_ref(), &token)
                .await
                .map_err(|e| AppError::internal("check_token", e))?
                .ok_or_else(AppError::need_login)?;
            Ok(AuthUser { user_id: user.id, user })
        })
    }
}

impl FromRequest for BasicAuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let db = match req.app_data::<web::Data<DatabaseConnection>>() {
            Some(db) => db.clone(),
            None => {
                return Box::pin(async { Err(AppError::system_exception().into()) });
            }
        };
        let credentials = extract_basic_credentials(req);

        Box::pin(async move {
            let (username, password) = credentials.ok_or_else(AppError::need_login)?;
            let user = user::Entity::find()
                .filter(user::Column::Username.eq(username))
                .one(db.get_ref())
                .await
                .map_err(|e| AppError::internal("basic auth lookup", e))?
                .ok_or_else(AppError::need_login)?;
            if !check_password(&user, &password) {
                return Err(AppError::need_login().into());
            }
            Ok(BasicAuthUser(user))
        })
    }
}

fn extract_bearer_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let header = config.token_header.as_str();
    let raw = req.headers().get(header)?.to_str().ok()?.trim();
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        // a dedicated token header may carry the bare value
        None if !header.eq_ignore_ascii_case(AUTHORIZATION.as_str()) => raw,
        _ => return None,
    };
    Some(token.to_string()).filter(|v| !v.is_empty())
}

fn extract_basic_credentials(req: &HttpRequest) -> Option<(String, String)> {
    let raw = req.headers().get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, encoded) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, BCRYPT_COST).map_err(|e| AppError::internal("hash_password", e))
}

pub fn check_password(user: &user::Model, password: &str) -> bool {
    match &user.password_hash {
        Some(hashed) => verify(password, hashed).unwrap_or_else(|e| {
            error!("password verify failed for user {}: {}", user.id, e);
            false
        }),
        None => false,
    }
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Returns the user's current token, or rotates it when it is missing or
/// close to expiring.
pub async fn get_token<C: ConnectionTrait>(db: &C, user: &user::Model, expires_in: i64) -> Result<String, DbErr> {
    issue_token_at(db, user, expires_in, Utc::now()).await
}

async fn issue_token_at<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    expires_in: i64,
    now: DateTime<Utc>,
) -> Result<String, DbErr> {
    if let (Some(token), Some(expiration)) = (&user.token, user.token_expiration) {
        if expiration > now + Duration::seconds(TOKEN_REUSE_MARGIN_SECS) {
            return Ok(token.clone());
        }
    }
    let token = generate_token();
    let active = user::ActiveModel {
        id: Set(user.id),
        token: Set(Some(token.clone())),
        token_expiration: Set(Some(now + Duration::seconds(expires_in))),
        last_seen: Set(Some(now)),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(token)
}

/// Expires the token one second in the past; the value itself is kept.
pub async fn revoke_token<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<(), DbErr> {
    let active = user::ActiveModel {
        id: Set(user_id),
        token_expiration: Set(Some(Utc::now() - Duration::seconds(1))),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

pub async fn check_token<C: ConnectionTrait>(db: &C, token: &str) -> Result<Option<user::Model>, DbErr> {
    let user = user::Entity::find()
        .filter(user::Column::Token.eq(token))
        .one(db)
        .await?;
    let now = Utc::now();
    Ok(user.filter(|u| u.token_expiration.is_some_and(|exp| exp >= now)))
}

#[derive(Serialize, Deserialize)]
struct ResetClaims {
    reset_password: i32,
    exp: usize,
}

pub fn get_reset_password_token(config: &AppConfig, user_id: i32, expires_in: i64) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::seconds(expires_in)).timestamp() as usize;
    let claims = ResetClaims {
        reset_password: user_id,
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(|e| AppError::internal("reset token encode", e))
}

/// Any decoding failure, expiry included, yields `None`.
pub async fn verify_reset_password_token<C: ConnectionTrait>(
    db: &C,
    config: &AppConfig,
    token: &str,
) -> Result<Option<user::Model>, DbErr> {
    let key = DecodingKey::from_secret(config.secret_key.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let claims = match decode::<ResetClaims>(token, &key, &validation) {
        Ok(data) => data.claims,
        Err(_) => return Ok(None),
    };
    user::Entity::find_by_id(claims.reset_password).one(db).await
}
