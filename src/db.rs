use log::{error, info};
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use std::fs;
use std::path::Path;

use crate::config::AppConfig;

pub async fn connect_db(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let url = config.database_url();
    ensure_sqlite_dir(&url);
    let db = Database::connect(&url).await?;
    init_sqlite_schema(&db).await?;
    Ok(db)
}

fn ensure_sqlite_dir(url: &str) {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return;
    };
    let path = rest.split('?').next().unwrap_or(rest);
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
}

/// Runs the bundled DDL when the database has no `t_role` table yet.
/// Other backends are expected to be migrated out of band.
pub async fn init_sqlite_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    if backend != DatabaseBackend::Sqlite {
        return Ok(());
    }
    let exists_stmt = Statement::from_string(
        backend,
        "SELECT name FROM sqlite_master WHERE type='table' AND name='t_role' LIMIT 1",
    );
    if db.query_one(exists_stmt).await?.is_some() {
        return Ok(());
    }

    info!("bootstrapping sqlite schema");
    let sql = include_str!("../schema-sqlite.sql");
    for stmt in split_sql(sql) {
        if let Err(e) = db.execute(Statement::from_string(backend, stmt.clone())).await {
            error!("schema statement failed: {} (sql={})", e, stmt);
            return Err(e);
        }
    }
    Ok(())
}

fn split_sql(input: &str) -> Vec<String> {
    let mut buf = String::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    buf.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
pub async fn connect_test_db() -> DatabaseConnection {
    let mut opts = sea_orm::ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.expect("in-memory sqlite");
    init_sqlite_schema(&db).await.expect("schema");
    db
}
