//! Provider SDK boundary
//!
//! The demuxer drives a remote streaming service through the [`Provider`]
//! trait. Calls that complete asynchronously (login, logout, metadata,
//! album browse) report back as [`SessionEvent`]s the next time the
//! session thread calls [`Provider::process_events`].
//!
//! - `events`: callback variants and the thread-safe entry points
//! - `librespot`: implementation on top of librespot (feature `librespot`)

mod events;
#[cfg(feature = "librespot")]
pub mod librespot;

use std::time::Duration;

use crate::config::Bitrate;

pub use events::{AudioDelivery, Notifier, ProviderContext, SessionEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("bad username or password")]
    BadCredentials,

    #[error("network error: {0}")]
    Network(String),

    #[error("not available: {0}")]
    Unavailable(String),

    #[error("no session")]
    NoSession,

    #[error("{0}")]
    Other(String),
}

/// Opaque re-login blob issued by the provider after a login
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBlob {
    pub username: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBlob")
            .field("username", &self.username)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

#[derive(Clone)]
pub enum LoginCredentials {
    Password { username: String, password: String },
    Blob(CredentialBlob),
}

impl LoginCredentials {
    pub fn username(&self) -> &str {
        match self {
            LoginCredentials::Password { username, .. } => username,
            LoginCredentials::Blob(blob) => &blob.username,
        }
    }
}

/// Accessor view of a loaded track
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// 22 character id
    pub id: String,
    /// `None` until the track's metadata is loaded
    pub name: Option<String>,
    /// Listed artists, in provider order
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
}

/// Result of a bulk album fetch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumBrowse {
    /// Canonical album URI
    pub album_uri: String,
    /// Tracks in provider order
    pub tracks: Vec<TrackInfo>,
}

/// The provider SDK as seen by the session thread and the control thread.
///
/// Only the session thread creates, logs in, pumps and releases. The
/// control thread only issues play/pause/seek on the live session.
pub trait Provider: Send + Sync {
    fn create_session(&self, ctx: ProviderContext) -> Result<(), ProviderError>;
    fn release_session(&self);

    fn set_preferred_bitrate(&self, bitrate: Bitrate) -> Result<(), ProviderError>;

    /// User the provider remembers from an earlier login, if any
    fn remembered_user(&self) -> Option<String>;
    /// Completes with [`SessionEvent::LoggedIn`]
    fn login(&self, credentials: LoginCredentials);
    /// Log in as the remembered user
    fn relogin(&self) -> Result<(), ProviderError>;
    /// Completes with [`SessionEvent::LoggedOut`]
    fn logout(&self);
    /// Drop the remembered user
    fn forget_me(&self);

    /// Start resolving a track; completes with [`SessionEvent::MetadataUpdated`]
    /// or [`SessionEvent::LookupFailed`]
    fn lookup_track(&self, uri: &str) -> Result<(), ProviderError>;
    fn track_info(&self, uri: &str) -> Option<TrackInfo>;
    fn release_track(&self, uri: &str);

    /// Completes with [`SessionEvent::AlbumBrowseComplete`]
    fn browse_album(&self, uri: &str) -> Result<(), ProviderError>;
    fn release_album(&self, uri: &str);
    fn release_browse(&self, browse: AlbumBrowse);

    fn player_load(&self, uri: &str) -> Result<(), ProviderError>;
    fn player_play(&self, play: bool);
    fn player_seek(&self, position: Duration);
    fn player_unload(&self);

    /// Dispatch whatever is queued and return when the provider wants to
    /// be pumped again. Zero means "call again right away".
    fn process_events(&self, dispatch: &mut dyn FnMut(SessionEvent)) -> Duration;
}
