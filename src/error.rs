//! Error types for order-relay.

use std::path::PathBuf;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Order not found: {order_key}")]
    NotFound { order_key: String },

    #[error("Invalid transition for order {order_key}: {message}")]
    InvalidTransition { order_key: String, message: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Price catalog loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog file not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read catalog: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid price {value:?} on row {row}: {message}")]
    InvalidPrice {
        row: usize,
        value: String,
        message: String,
    },

    #[error("Catalog at {0} contained no usable entries")]
    Empty(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Strategy {strategy} failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    #[error("Strategy {strategy} produced empty output")]
    EmptyOutput { strategy: String },

    #[error("All {attempted} rendering strategies failed")]
    AllStrategiesFailed { attempted: usize },
}

/// Outbound mail dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid recipient address {address}: {reason}")]
    InvalidRecipient { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Smtp(String),
}

/// Order processing errors raised at the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Order is missing an order number")]
    MissingOrderNumber,

    #[error("Unknown product-line prefix in order key: {0}")]
    UnknownVendorPrefix(String),

    #[error("Order source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Stored snapshot for {order_key} could not be decoded: {message}")]
    CorruptSnapshot { order_key: String, message: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
