//! Error types for extraction.

use thiserror::Error;

/// Errors that abort an extraction run.
#[derive(Debug, Error)]
pub enum Error {
    /// The container could not be opened or parsed.
    #[error(transparent)]
    Npk(#[from] neox_npk::Error),

    /// I/O error outside a single entry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Name report serialisation failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A nested ZIP payload could not be read.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for extraction.
pub type Result<T> = std::result::Result<T, Error>;
