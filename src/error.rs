use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Worker task ended without a result")]
    WorkerLost,

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("No root configured for category {category}")]
    UnknownCategory { category: String },

    #[error("Operation cancelled")]
    Cancelled,
}
