use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InboxConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub store: StoreBackend,
    pub mongodb: MongoConfig,
    pub smtp: SmtpConfig,
    pub fcm: FcmConfig,
    pub dispatch: DispatchConfig,
    pub inbox: InboxPageConfig,
}

/// Which `NotificationStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    /// Process-local; for tests and local development only.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown NOTIFICATION_STORE '{}'. Must be one of: mongo, memory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub timeout_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    pub project_id: String,
    /// OAuth2 bearer token for the FCM HTTP v1 API.
    pub access_token: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub send_timeout_ms: u64,
}

impl DispatchConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            send_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxPageConfig {
    pub default_page_size: u32,
}

impl InboxConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let defaults = DispatchConfig::default();

        let store: StoreBackend = get_env("NOTIFICATION_STORE", Some("mongo"), false)?.parse()?;
        if is_prod && store == StoreBackend::Memory {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "NOTIFICATION_STORE=memory is not allowed in production"
            )));
        }

        Ok(InboxConfig {
            common: common_config,
            store,
            mongodb: MongoConfig {
                uri: get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod && store == StoreBackend::Mongo,
                )?,
                database: get_env("MONGODB_DATABASE", Some("inbox_db"), false)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", 587)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Pet Care"), false)?,
                timeout_secs: parse_env("SMTP_TIMEOUT_SECS", 10)?,
                enabled: parse_env("SMTP_ENABLED", false)?,
            },
            fcm: FcmConfig {
                project_id: get_env("FCM_PROJECT_ID", Some(""), false)?,
                access_token: get_env("FCM_ACCESS_TOKEN", Some(""), false)?,
                api_base_url: get_env(
                    "FCM_API_BASE_URL",
                    Some("https://fcm.googleapis.com"),
                    false,
                )?,
                timeout_secs: parse_env("FCM_TIMEOUT_SECS", 10)?,
                enabled: parse_env("FCM_ENABLED", false)?,
            },
            dispatch: DispatchConfig {
                max_retries: parse_env("DISPATCH_MAX_RETRIES", defaults.max_retries)?,
                initial_backoff_ms: parse_env(
                    "DISPATCH_INITIAL_BACKOFF_MS",
                    defaults.initial_backoff_ms,
                )?,
                max_backoff_ms: parse_env("DISPATCH_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
                send_timeout_ms: nonzero(
                    "DISPATCH_SEND_TIMEOUT_MS",
                    parse_env("DISPATCH_SEND_TIMEOUT_MS", defaults.send_timeout_ms)?,
                )?,
            },
            inbox: InboxPageConfig {
                default_page_size: parse_env("INBOX_PAGE_SIZE", 20)?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Parse an optional variable, failing loudly on a malformed value.
fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

/// A zero timeout would fail every send before it starts.
fn nonzero(key: &str, value: u64) -> Result<u64, AppError> {
    if value == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(value)
}
