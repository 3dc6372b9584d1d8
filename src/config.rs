use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub secret_key: String,
    pub token_header: String,
    pub token_expires_in: i64,
    pub elasticsearch_url: Option<String>,
    pub admin_email: Option<String>,
    pub redis_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(38321);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/titulos/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let secret_key = env::var("SECRET_KEY").unwrap_or_else(|_| "you-will-never-guess".to_string());

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "Authorization".to_string());

        let token_expires_in = env::var("TOKEN_EXPIRES_IN")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(3600);

        let elasticsearch_url = env::var("ELASTICSEARCH_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());
        let admin_email = env::var("ADMIN_EMAIL").ok().filter(|v| !v.trim().is_empty());
        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        Self {
            server_port,
            sqlite_path,
            database_url,
            secret_key,
            token_header,
            token_expires_in,
            elasticsearch_url,
            admin_email,
            redis_url,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}?mode=rwc", path)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_port: 0,
            sqlite_path: String::new(),
            database_url: Some("sqlite::memory:".to_string()),
            secret_key: "test-secret".to_string(),
            token_header: "Authorization".to_string(),
            token_expires_in: 3600,
            elasticsearch_url: None,
            admin_email: Some("admin@example.com".to_string()),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}
