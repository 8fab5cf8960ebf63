use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Transactional mail API endpoint. `None` logs codes instead of sending them.
    pub api_url: Option<String>,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    FixedWindow,
    TokenBucket,
}

impl FromStr for RateLimitKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_window" | "fixed-window" => Ok(Self::FixedWindow),
            "token_bucket" | "token-bucket" => Ok(Self::TokenBucket),
            other => anyhow::bail!("unknown rate limit strategy {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub kind: RateLimitKind,
    pub max_requests: u32,
    pub window: Duration,
    /// Key clients by `X-Forwarded-For`; set only behind a proxy that overwrites it.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub resend_cooldown: Duration,
    pub max_attempts: i32,
    pub require_verified_login: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            attempt_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub cors_origin: String,
    pub cookie_secure: bool,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub rate_limit: RateLimitConfig,
    pub verification: VerificationConfig,
    pub upload: UploadConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = format!(
            "{}:{}",
            env_or("APP_HOST", "0.0.0.0".to_string())?,
            env_or("APP_PORT", 8000u16)?
        )
        .parse()
        .context("APP_HOST/APP_PORT")?;
        let production = env_or("APP_ENV", "development".to_string())? == "production";

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            refresh_secret: required("JWT_REFRESH_SECRET")?,
            issuer: env_or("JWT_ISSUER", "eventboard".to_string())?,
            audience: env_or("JWT_AUDIENCE", "eventboard-users".to_string())?,
            ttl_minutes: env_or("JWT_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 15)?,
        };

        let endpoint = required("STORAGE_ENDPOINT")?;
        let bucket = required("STORAGE_BUCKET")?;
        let default_public = format!("{}/{}", endpoint.trim_end_matches('/'), bucket);
        let storage = StorageConfig {
            access_key: required("STORAGE_ACCESS_KEY")?,
            secret_key: required("STORAGE_SECRET_KEY")?,
            region: env_or("STORAGE_REGION", "us-east-1".to_string())?,
            public_url: env_or("STORAGE_PUBLIC_URL", default_public)?,
            endpoint,
            bucket,
        };

        let mail = MailConfig {
            api_url: std::env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: env_or("MAIL_API_KEY", String::new())?,
            from: env_or("MAIL_FROM", "Eventboard <no-reply@eventboard.local>".to_string())?,
        };

        let rate_limit = RateLimitConfig {
            kind: env_or("RATE_LIMIT_STRATEGY", RateLimitKind::FixedWindow)?,
            max_requests: env_or("RATE_LIMIT_MAX", 100)?,
            window: Duration::from_secs(env_or("RATE_LIMIT_WINDOW_SECS", 15 * 60)?),
            trust_forwarded_for: env_or("TRUST_FORWARDED_FOR", false)?,
        };

        let verification = VerificationConfig {
            resend_cooldown: Duration::from_secs(env_or("VERIFICATION_RESEND_COOLDOWN_SECS", 30)?),
            max_attempts: env_or("VERIFICATION_MAX_ATTEMPTS", 5)?,
            require_verified_login: env_or("AUTH_REQUIRE_VERIFIED_LOGIN", true)?,
        };

        let defaults = UploadConfig::default();
        let upload = UploadConfig {
            max_bytes: env_or("UPLOAD_MAX_BYTES", defaults.max_bytes)?,
            attempt_timeout: Duration::from_secs(env_or(
                "UPLOAD_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?),
            max_attempts: env_or("UPLOAD_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            retry_delay: Duration::from_millis(env_or(
                "UPLOAD_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )?),
        };

        Ok(Self {
            bind_addr,
            database_url: required("DATABASE_URL")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:3000".to_string())?,
            cookie_secure: env_or("COOKIE_SECURE", production)?,
            jwt,
            storage,
            mail,
            rate_limit,
            verification,
            upload,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

/// Reads `key`, falling back to `default` when unset. A present but unparsable value is an error.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
