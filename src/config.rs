//! Configuration, read from environment variables.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::orders::Vendor;

/// Top-level relay configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// libSQL database file path.
    pub db_path: PathBuf,
    /// CSV price catalog path.
    pub catalog_path: PathBuf,
    /// Directory watched for incoming parsed-order JSON files.
    pub spool_dir: PathBuf,
    /// Order poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Admin API listen port.
    pub api_port: u16,
    /// Outbound dispatch attempts per order (1 = no retry).
    pub dispatch_attempts: u32,
    /// Prune tracking records older than this many days at startup.
    pub keep_days: Option<u32>,
    pub smtp: SmtpConfig,
    pub recipients: RecipientMap,
}

impl AppConfig {
    /// Build config from environment variables. `ORDER_RELAY_CATALOG` is
    /// required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let catalog_path = std::env::var("ORDER_RELAY_CATALOG")
            .map_err(|_| ConfigError::MissingEnvVar("ORDER_RELAY_CATALOG".to_string()))?;

        let db_path = std::env::var("ORDER_RELAY_DB")
            .unwrap_or_else(|_| "data/orders.db".to_string());

        let spool_dir = std::env::var("ORDER_RELAY_SPOOL")
            .unwrap_or_else(|_| "data/spool".to_string());

        let poll_interval_secs: u64 = std::env::var("ORDER_RELAY_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let api_port: u16 = std::env::var("ORDER_RELAY_API_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8090);

        let dispatch_attempts: u32 = std::env::var("ORDER_RELAY_DISPATCH_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        if dispatch_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ORDER_RELAY_DISPATCH_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            db_path: PathBuf::from(db_path),
            catalog_path: PathBuf::from(catalog_path),
            spool_dir: PathBuf::from(spool_dir),
            poll_interval_secs,
            api_port,
            dispatch_attempts,
            keep_days: std::env::var("ORDER_RELAY_KEEP_DAYS")
                .ok()
                .and_then(|s| s.parse().ok()),
            smtp: SmtpConfig::from_env()?,
            recipients: RecipientMap::from_env()?,
        })
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("ORDER_RELAY_SMTP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("ORDER_RELAY_SMTP_HOST".to_string()))?;

        let port: u16 = std::env::var("ORDER_RELAY_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("ORDER_RELAY_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("ORDER_RELAY_SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("ORDER_RELAY_FROM_ADDRESS")
            .unwrap_or_else(|_| username.clone());

        Ok(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Destination address per product line.
#[derive(Debug, Clone)]
pub struct RecipientMap {
    pub tileware: String,
    pub laticrete: String,
}

impl RecipientMap {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            tileware: std::env::var("ORDER_RELAY_TILEWARE_RECIPIENT")
                .map_err(|_| ConfigError::MissingEnvVar("ORDER_RELAY_TILEWARE_RECIPIENT".to_string()))?,
            laticrete: std::env::var("ORDER_RELAY_LATICRETE_RECIPIENT")
                .map_err(|_| ConfigError::MissingEnvVar("ORDER_RELAY_LATICRETE_RECIPIENT".to_string()))?,
        })
    }

    pub fn for_vendor(&self, vendor: Vendor) -> &str {
        match vendor {
            Vendor::Tileware => &self.tileware,
            Vendor::Laticrete => &self.laticrete,
        }
    }
}
