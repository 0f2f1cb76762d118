//! Error type shared by the response factory and the model layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A response macro was invoked that was never registered.
    #[error("Method {method} does not exist.")]
    UndefinedMethod { method: String },

    /// A model touched the database before a connection resolver was set.
    #[error("No connection resolver has been set")]
    ResolverNotSet,

    #[error("Database connection [{0}] not configured")]
    UnknownConnection(String),

    #[error("View [{0}] not found")]
    ViewNotFound(String),

    #[error("Invalid content disposition: {0}")]
    InvalidDisposition(String),

    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
