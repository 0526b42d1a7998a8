//! Callbacks from the provider, as data
//!
//! [`SessionEvent`]s are produced while the session thread pumps the
//! provider and handled there by a single `match`. The two callbacks that
//! may fire on provider-internal threads are not events: they go through
//! [`Notifier`] and [`AudioDelivery`], both safe to call from anywhere.

use std::sync::Arc;

use super::{AlbumBrowse, CredentialBlob, ProviderError};
use crate::host::StreamFormat;
use crate::lifecycle::Lifecycle;
use crate::pacer::AudioPacer;

/// Callbacks delivered on the session thread during event pumping
#[derive(Debug)]
pub enum SessionEvent {
    LoggedIn(Result<(), ProviderError>),
    LoggedOut,
    /// Some metadata finished loading; accessors may now resolve
    MetadataUpdated,
    /// A track lookup started with `lookup_track` will never resolve
    LookupFailed(ProviderError),
    AlbumBrowseComplete(Result<AlbumBrowse, ProviderError>),
    /// The provider issued a new re-login blob
    CredentialsUpdated(CredentialBlob),
    EndOfTrack,
    /// Another client started playing on the same account
    PlayTokenLost,
    StreamingError(ProviderError),
    ConnectionError(ProviderError),
    LogMessage(String),
    MessageToUser(String),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::LoggedIn(_) => "logged_in",
            SessionEvent::LoggedOut => "logged_out",
            SessionEvent::MetadataUpdated => "metadata_updated",
            SessionEvent::LookupFailed(_) => "lookup_failed",
            SessionEvent::AlbumBrowseComplete(_) => "album_browse_complete",
            SessionEvent::CredentialsUpdated(_) => "credentials_updated",
            SessionEvent::EndOfTrack => "end_of_track",
            SessionEvent::PlayTokenLost => "play_token_lost",
            SessionEvent::StreamingError(_) => "streaming_error",
            SessionEvent::ConnectionError(_) => "connection_error",
            SessionEvent::LogMessage(_) => "log_message",
            SessionEvent::MessageToUser(_) => "message_to_user",
        }
    }
}

/// "Please pump events now" signal
#[derive(Clone)]
pub struct Notifier {
    lifecycle: Arc<Lifecycle>,
}

impl Notifier {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn notify(&self) {
        self.lifecycle.notify();
    }
}

/// Entry point for decoded frames
#[derive(Clone)]
pub struct AudioDelivery {
    pacer: Arc<AudioPacer>,
}

impl AudioDelivery {
    pub(crate) fn new(pacer: Arc<AudioPacer>) -> Self {
        Self { pacer }
    }

    /// Offer `num_frames` interleaved frames. Returns how many were
    /// accepted; 0 means "try again later".
    pub fn deliver(&self, format: StreamFormat, frames: &[i16], num_frames: usize) -> usize {
        self.pacer.deliver(format, frames, num_frames)
    }

    /// The host no longer takes audio for this item
    pub fn is_closed(&self) -> bool {
        self.pacer.is_eof()
    }
}

/// Handed to the provider when the session is created
#[derive(Clone)]
pub struct ProviderContext {
    pub notifier: Notifier,
    pub audio: AudioDelivery,
}
