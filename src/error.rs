//! Error types for the demuxer.
//!
//! Provider-side failures carry their own [`ProviderError`]; everything a
//! caller of the demuxer can see is folded into [`Error`].

use crate::provider::ProviderError;

/// Demuxer result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URI is not a track or album this module can handle
    #[error("cannot handle URI: {0}")]
    UnsupportedUri(String),

    /// Another session already owns the provider
    #[error("a provider session is already active")]
    SessionBusy,

    /// Startup did not complete before the deadline
    #[error("startup timed out")]
    StartupTimeout,

    /// Startup ended without success (login rejected, no credentials,
    /// item unavailable)
    #[error("startup failed")]
    StartupFailed,

    /// The session thread could not be started
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Control query not supported for the opened item
    #[error("unsupported control query")]
    UnsupportedControl,

    /// An allocation failed; nothing was published
    #[error("out of memory")]
    OutOfMemory,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
