//! Common error types for trident

use thiserror::Error;

use crate::db::gateway::GatewayError;

/// Result alias used by bootstrap and import entry points
pub type Result<T> = std::result::Result<T, Error>;

/// Failures outside the placement core: opening storage, reading config,
/// preparing the data folder
#[derive(Error, Debug)]
pub enum Error {
    /// Schema setup or settings access failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Gateway(#[from] GatewayError),

    /// Root folder or config file could not be read or created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file missing or not valid TOML
    #[error("Configuration error: {0}")]
    Config(String),
}
