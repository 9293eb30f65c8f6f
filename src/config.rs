use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::auth::jwt::DEFAULT_ACCESS_TOKEN_MINUTES;
use crate::auth::services::DEFAULT_REFRESH_TOKEN_DAYS;

const MIN_PRODUCTION_SECRET_LEN: usize = 32;
const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 60;
const MAX_ACCESS_TOKEN_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TOKEN_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Detects the environment from the process variables
    pub fn detect() -> Self {
        Self::from_values(
            env::var("AWS_LAMBDA_FUNCTION_NAME").ok().as_deref(),
            env::var("APP_ENV").ok().as_deref(),
        )
    }

    fn from_values(lambda_function: Option<&str>, app_env: Option<&str>) -> Self {
        if lambda_function.is_some() {
            return Self::Production;
        }
        match app_env {
            Some("production" | "prod") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Backing store for users and refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreKind {
    Postgres,
    Memory,
}

impl FromStr for SessionStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown SESSION_STORE '{other}' (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub session_store: SessionStoreKind,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub google_client_id: String,
    pub frontend_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// 0 disables the in-process cleanup task.
    pub cleanup_interval_minutes: u64,
}

impl Config {
    /// Loads the configuration from the environment, reading `.env` first in development.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::detect();
        tracing::info!(
            "🌍 Environment detected: {}",
            environment.as_str().to_uppercase()
        );

        Self::load_env_file(environment);

        let config = Self::from_lookup(environment, |key| env::var(key).ok())?;

        tracing::info!("✅ Configuration loaded successfully");
        tracing::debug!("   Store: {:?}", config.session_store);
        tracing::debug!("   Database: {}", Self::mask_credentials(&config.database_url));
        tracing::debug!("   Frontend: {}", config.frontend_url);
        tracing::debug!("   Server: {}:{}", config.server_host, config.server_port);

        Ok(config)
    }

    fn from_lookup(environment: Environment, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let session_store = match lookup("SESSION_STORE") {
            Some(value) => value.parse()?,
            None => SessionStoreKind::Postgres,
        };
        let database_url = Self::get_database_url(environment, session_store, &lookup)?;
        let jwt_secret = Self::get_jwt_secret(environment, &lookup)?;

        let access_token_minutes: i64 =
            parse_or(&lookup, "ACCESS_TOKEN_MINUTES", DEFAULT_ACCESS_TOKEN_MINUTES)?;
        let refresh_token_days: i64 =
            parse_or(&lookup, "REFRESH_TOKEN_DAYS", DEFAULT_REFRESH_TOKEN_DAYS)?;
        if !(0..=MAX_ACCESS_TOKEN_MINUTES).contains(&access_token_minutes) {
            anyhow::bail!(
                "ACCESS_TOKEN_MINUTES must be between 0 and {MAX_ACCESS_TOKEN_MINUTES} \
                 (got {access_token_minutes})"
            );
        }
        if !(1..=MAX_REFRESH_TOKEN_DAYS).contains(&refresh_token_days) {
            anyhow::bail!(
                "REFRESH_TOKEN_DAYS must be between 1 and {MAX_REFRESH_TOKEN_DAYS} \
                 (got {refresh_token_days})"
            );
        }

        let google_client_id = lookup("GOOGLE_CLIENT_ID").unwrap_or_default();
        if google_client_id.is_empty() {
            if environment.is_production() {
                anyhow::bail!("GOOGLE_CLIENT_ID is required in production");
            }
            tracing::warn!("⚠️  GOOGLE_CLIENT_ID not set, Google sign-in will reject every token");
        }

        Ok(Self {
            environment,
            session_store,
            database_url,
            jwt_secret,
            jwt_issuer: non_empty(lookup("JWT_ISSUER")),
            jwt_audience: non_empty(lookup("JWT_AUDIENCE")),
            access_token_minutes,
            refresh_token_days,
            google_client_id,
            frontend_url: Self::get_frontend_url(environment, &lookup),
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            cleanup_interval_minutes: parse_or(
                &lookup,
                "TOKEN_CLEANUP_INTERVAL_MINUTES",
                DEFAULT_CLEANUP_INTERVAL_MINUTES,
            )?,
        })
    }

    fn load_env_file(environment: Environment) {
        // Lambda injects its variables directly
        if environment.is_production() {
            tracing::info!("📦 Production mode: using injected environment variables");
            return;
        }

        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("📦 Development mode: loaded {}", path.display()),
            Err(e) if e.not_found() => {
                tracing::warn!("   .env file not found, using environment variables");
            }
            Err(e) => tracing::warn!("   Failed to read .env file: {e}"),
        }
    }

    fn get_database_url(
        environment: Environment,
        store: SessionStoreKind,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<String> {
        if let Some(url) = lookup("DATABASE_URL") {
            return Ok(url);
        }

        if environment.is_production() && store == SessionStoreKind::Postgres {
            anyhow::bail!(
                "DATABASE_URL must be set in production! \
                 Configure it in Lambda environment variables."
            );
        }

        // Development: assemble from the docker-compose style parts
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            var("POSTGRES_USER", "postgres"),
            var("POSTGRES_PASSWORD", "postgres"),
            var("DB_HOST", "localhost"),
            var("DB_PORT", "5432"),
            var("POSTGRES_DB", "session_db"),
        ))
    }

    /// Tokens are never signed with a built-in key; a missing secret aborts startup.
    fn get_jwt_secret(
        environment: Environment,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<String> {
        let Some(secret) = non_empty(lookup("JWT_SECRET")) else {
            tracing::error!("❌ JWT_SECRET not set!");
            anyhow::bail!("JWT_SECRET is required");
        };

        if environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LEN {
            anyhow::bail!(
                "JWT_SECRET must be at least {MIN_PRODUCTION_SECRET_LEN} characters in production (current: {})",
                secret.len()
            );
        }

        Ok(secret)
    }

    fn get_frontend_url(
        environment: Environment,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> String {
        lookup("FRONTEND_URL").unwrap_or_else(|| {
            if environment.is_production() {
                "https://app.example.com".to_string()
            } else {
                "http://localhost:8080".to_string()
            }
        })
    }

    /// Hides credentials in logged connection strings
    pub fn mask_credentials(url: &str) -> String {
        if let Some(at_pos) = url.rfind('@')
            && let Some(scheme_end) = url.find("://")
        {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos..];
            return format!("{scheme}***:***{after_at}");
        }
        url.to_string()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
