use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

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
    pub app_base_url: String,
    pub spaces_endpoint: Option<String>,
    pub spaces_key: Option<String>,
    pub spaces_secret: Option<String>,
    pub spaces_region: String,
    pub spaces_bucket: String,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_from_email: String,
    pub notify_timeout_seconds: u64,
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
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "leadsign".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "leadsign-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "1440".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let app_base_url = env::var("APP_BASE_URL")
            .ok()
            .or_else(|| first_origin(cors_allowed_origin.as_deref()))
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        Url::parse(&app_base_url).context("APP_BASE_URL must be an absolute URL")?;
        let spaces_endpoint = env::var("SPACES_ENDPOINT").ok();
        let spaces_key = env::var("SPACES_KEY").ok();
        let spaces_secret = env::var("SPACES_SECRET").ok();
        let spaces_region = env::var("SPACES_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let spaces_bucket = env::var("SPACES_BUCKET").context("SPACES_BUCKET must be set")?;
        let sendgrid_api_key = env::var("SENDGRID_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let sendgrid_from_email = env::var("SENDGRID_FROM_EMAIL")
            .unwrap_or_else(|_| "no-reply@localhost".to_string());
        let notify_timeout_seconds = env::var("NOTIFY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("NOTIFY_TIMEOUT_SECONDS must be an integer")?;

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
            app_base_url,
            spaces_endpoint,
            spaces_key,
            spaces_secret,
            spaces_region,
            spaces_bucket,
            sendgrid_api_key,
            sendgrid_from_email,
            notify_timeout_seconds,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Link a signer follows to reach the signing page of a document.
    pub fn signing_url(&self, document_id: uuid::Uuid) -> String {
        format!("{}/sign/{document_id}", self.app_base_url.trim_end_matches('/'))
    }
}

fn first_origin(origins: Option<&str>) -> Option<String> {
    origins?
        .split(',')
        .map(str::trim)
        .find(|origin| !origin.is_empty())
        .map(str::to_string)
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
