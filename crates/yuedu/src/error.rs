use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum YueduError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failures of job store, lease and worker operations.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Translation not found: {0}")]
    NotFound(String),

    #[error("Illegal transition for translation {id}: {from} -> {to}")]
    Conflict {
        id: String,
        from: String,
        to: &'static str,
    },

    #[error("Lease lost for translation {0}")]
    LeaseLost(String),

    #[error("Upstream temporarily unavailable: {0}")]
    UpstreamTransient(String),

    #[error("Upstream returned unusable output: {0}")]
    UpstreamStructural(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl JobError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransient(_) | Self::Database(_))
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, YueduError>;
