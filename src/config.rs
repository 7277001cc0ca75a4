use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    // Populated from the .env file
    pub database_path: String,
    pub media_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub session_secret_key: String,
    pub use_secure_cookies: bool,
    pub max_upload_size_mb: u64,
    pub db_busy_timeout_ms: u64,
}

fn required_var(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| {
        config::ConfigError::Message(format!(
            "FATAL: Environment variable '{}' is not set in your .env file.",
            name
        ))
    })
}

fn numeric_var(name: &str, default: u64) -> Result<u64, config::ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
            config::ConfigError::Message(format!("FATAL: '{}' must be a whole number, got '{}'.", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn absolute_path_var(name: &str) -> Result<String, config::ConfigError> {
    let value = required_var(name)?;
    if Path::new(&value).is_relative() {
        return Err(config::ConfigError::Message(format!(
            "FATAL: The '{}' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
            name, value
        )));
    }
    Ok(value)
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;

        let database_path = absolute_path_var("DATABASE_PATH")?;
        let media_path = absolute_path_var("MEDIA_PATH")?;

        // 128 hex characters = the 64-byte cookie signing key.
        let session_secret_key = required_var("SESSION_SECRET_KEY")?;
        if session_secret_key.len() != 128 || !session_secret_key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(config::ConfigError::Message(
                "FATAL: 'SESSION_SECRET_KEY' must be 128 hexadecimal characters long (64 bytes).".to_string(),
            ));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let max_upload_size_mb = numeric_var("MAX_UPLOAD_SIZE_MB", 5)?;
        let db_busy_timeout_ms = numeric_var("DB_BUSY_TIMEOUT_MS", 5000)?;

        let builder = config::Config::builder()
            // web.host / web.port
            .add_source(config::File::new("config/default.toml", config::FileFormat::Toml))
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("session_secret_key", session_secret_key)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("use_secure_cookies", use_secure_cookies)?
            .set_override("max_upload_size_mb", max_upload_size_mb)?
            .set_override("db_busy_timeout_ms", db_busy_timeout_ms)?
            .build()?;

        builder.try_deserialize()
    }

    /// Full path to the content database file inside its own folder.
    pub fn content_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("content").join("content.db")
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}
