//! Container runtime error types.

use thiserror::Error;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from driving the container runtime CLI.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime command failed.
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// No container runtime available.
    #[error("no container runtime available (docker or podman)")]
    NoRuntimeAvailable,

    /// The compose manifest does not exist yet.
    #[error("compose manifest not found: {0} (run `trainbox generate` first)")]
    ManifestMissing(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
