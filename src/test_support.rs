use std::sync::Arc;

use actix_web::http::header::AUTHORIZATION;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use crate::auth::{get_token, hash_password};
use crate::config::AppConfig;
use crate::db::connect_test_db;
use crate::entity::user;
use crate::jobs::LocalJobQueue;
use crate::permission::{insert_roles, role_for_new_user};
use crate::search::{MemoryIndex, SearchHook};
use crate::session::CommitHooks;

pub struct TestCtx {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub index: Arc<MemoryIndex>,
    pub queue: Arc<LocalJobQueue>,
    pub hooks: CommitHooks,
}

impl TestCtx {
    pub async fn new() -> Self {
        let db = connect_test_db().await;
        insert_roles(&db).await.unwrap();
        let index = Arc::new(MemoryIndex::default());
        let mut hooks = CommitHooks::new();
        hooks.register(Arc::new(SearchHook::new(index.clone())));
        Self {
            db,
            config: AppConfig::for_tests(),
            index,
            queue: Arc::new(LocalJobQueue::new()),
            hooks,
        }
    }

    /// Inserts a user without a password and hands back a live bearer token.
    pub async fn user(&self, username: &str) -> (user::Model, String) {
        self.insert_user(username, None).await
    }

    pub async fn user_with_password(&self, username: &str, password: &str) -> (user::Model, String) {
        self.insert_user(username, Some(hash_password(password).unwrap())).await
    }

    async fn insert_user(&self, username: &str, password_hash: Option<String>) -> (user::Model, String) {
        let email = format!("{}@example.com", username);
        let role = role_for_new_user(&self.db, &email, self.config.admin_email.as_deref())
            .await
            .unwrap();
        let model = user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role_id: Set(role.map(|r| r.id)),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
        let token = get_token(&self.db, &model, 3600).await.unwrap();
        (model, token)
    }
}

pub fn bearer(token: &str) -> (actix_web::http::header::HeaderName, String) {
    (AUTHORIZATION, format!("Bearer {}", token))
}

/// Builds the full API service over a [`TestCtx`].
macro_rules! test_app {
    ($ctx:expr) => {{
        let ctx = &$ctx;
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new(ctx.config.clone()))
                .app_data(actix_web::web::Data::new(ctx.db.clone()))
                .app_data(actix_web::web::Data::new(ctx.hooks.clone()))
                .app_data(actix_web::web::Data::from(
                    ctx.index.clone() as std::sync::Arc<dyn crate::search::SearchIndex>
                ))
                .app_data(actix_web::web::Data::from(
                    ctx.queue.clone() as std::sync::Arc<dyn crate::jobs::JobQueue>
                ))
                .app_data(
                    actix_web::web::JsonConfig::default().error_handler(crate::response::json_error_handler),
                )
                .configure(crate::routes::config),
        )
        .await
    }};
}
