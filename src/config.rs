use std::env;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::tracking::session::SESSION_IDLE_TIMEOUT_MINUTES;

pub const DEFAULT_REPORTING_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub cors_allowed_origin: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
    pub access_url_expiry_seconds: u64,
    pub reporting_timezone: Tz,
    pub ping_timeout_seconds: u64,
    pub session_idle_minutes: i64,
    pub cleanup_batch_size: i64,
    pub cleanup_max_batches: u32,
    pub cleanup_timeout_minutes: u64,
    pub notify_webhook_url: Option<String>,
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
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "doctrack".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "doctrack-dashboard".to_string());
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
        let access_url_expiry_seconds = env::var("ACCESS_URL_EXPIRY_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("ACCESS_URL_EXPIRY_SECONDS must be an integer")?;
        let reporting_timezone = match env::var("REPORTING_TIMEZONE") {
            Ok(raw) => parse_timezone(&raw)?,
            Err(_) => DEFAULT_REPORTING_TIMEZONE,
        };
        let ping_timeout_seconds = env::var("PING_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("PING_TIMEOUT_SECONDS must be an integer")?;
        let session_idle_minutes = match env::var("SESSION_IDLE_MINUTES") {
            Ok(raw) => parse_idle_minutes(&raw)?,
            Err(_) => SESSION_IDLE_TIMEOUT_MINUTES,
        };
        let cleanup_batch_size = env::var("CLEANUP_BATCH_SIZE")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .context("CLEANUP_BATCH_SIZE must be an integer")?;
        let cleanup_max_batches = env::var("CLEANUP_MAX_BATCHES")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .context("CLEANUP_MAX_BATCHES must be an integer")?;
        let cleanup_timeout_minutes = env::var("CLEANUP_TIMEOUT_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("CLEANUP_TIMEOUT_MINUTES must be an integer")?;
        let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            cors_allowed_origin,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            access_url_expiry_seconds,
            reporting_timezone,
            ping_timeout_seconds,
            session_idle_minutes,
            cleanup_batch_size,
            cleanup_max_batches,
            cleanup_timeout_minutes,
            notify_webhook_url,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow!("REPORTING_TIMEZONE must be an IANA zone name: {err}"))
}

fn parse_idle_minutes(raw: &str) -> Result<i64> {
    let minutes: i64 = raw
        .trim()
        .parse()
        .context("SESSION_IDLE_MINUTES must be an integer")?;
    if minutes <= 0 {
        return Err(anyhow!("SESSION_IDLE_MINUTES must be positive"));
    }
    Ok(minutes)
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "***".to_string(),
    }
}
