#[cfg(test)]
#[macro_use]
mod test_support;

mod auth;
mod config;
mod db;
mod entity;
mod error;
mod jobs;
mod pagination;
mod permission;
mod response;
mod routes;
mod search;
mod session;
mod social;

use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use config::AppConfig;
use db::connect_db;
use jobs::{JobQueue, RedisJobQueue};
use log::info;
use response::json_error_handler;
use search::{index_from_config, SearchHook};
use session::CommitHooks;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = AppConfig::from_env();
    let db = connect_db(&config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("database connect failed: {}", e)))?;
    permission::insert_roles(&db)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("role seeding failed: {}", e)))?;

    let index = index_from_config(&config);
    let mut hooks = CommitHooks::new();
    hooks.register(Arc::new(SearchHook::new(index.clone())));
    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::new(&config.redis_url)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("job queue setup failed: {}", e)))?,
    );
    let server_port = config.server_port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(hooks.clone()))
            .app_data(web::Data::from(index.clone()))
            .app_data(web::Data::from(queue.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .wrap(middleware::from_fn(routes::cors::cors_handler))
            .configure(routes::config)
    })
    .bind(("0.0.0.0", server_port))?;
    info!("server started at http://0.0.0.0:{}", server_port);
    server.run().await
}
