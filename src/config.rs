use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_JWT_EXPIRY_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_AI_SERVICE_URL: &str = "http://localhost:5001/analyze";
pub const DEFAULT_AI_SERVICE_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub cors_allowed_origin: Option<String>,
    pub ai_service_url: String,
    pub ai_service_timeout_seconds: u64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "labinsight".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "labinsight-clients".to_string());
        let jwt_expiry_minutes = match env::var("JWT_EXPIRY_MINUTES") {
            Ok(value) => value
                .parse()
                .context("JWT_EXPIRY_MINUTES must be an integer")?,
            Err(_) => DEFAULT_JWT_EXPIRY_MINUTES,
        };
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let ai_service_url =
            env::var("AI_SERVICE_URL").unwrap_or_else(|_| DEFAULT_AI_SERVICE_URL.to_string());
        let ai_service_timeout_seconds = match env::var("AI_SERVICE_TIMEOUT_SECONDS") {
            Ok(value) => value
                .parse()
                .context("AI_SERVICE_TIMEOUT_SECONDS must be an integer")?,
            Err(_) => DEFAULT_AI_SERVICE_TIMEOUT_SECONDS,
        };
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));
        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(value) => value
                .parse()
                .context("MAX_UPLOAD_BYTES must be an integer")?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            cors_allowed_origin,
            ai_service_url,
            ai_service_timeout_seconds,
            upload_dir,
            max_upload_bytes,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
