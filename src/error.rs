//! Error types for the engine host.

use thiserror::Error;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Artifact download error
    #[error("Download error: {0}")]
    Download(#[from] crate::binaries::download::DownloadError),

    /// Engine acquisition error
    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::binaries::fetch::FetchError),

    /// Query engine lifecycle error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::engine::lifecycle::LifecycleError),

    /// Introspection error
    #[error("Introspection error: {0}")]
    Introspection(#[from] crate::engine::introspection::IntrospectionError),

    /// Engine channel error
    #[error("Channel error: {0}")]
    Channel(#[from] crate::engine::channel::ChannelError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine host operations.
pub type Result<T> = std::result::Result<T, Error>;
