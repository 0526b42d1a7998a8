//! Spotify access module for a media playback host
//!
//! Opens `spotify:track:…`/`spotify:album:…` URIs (and their
//! `open.spotify.com/` web forms). Tracks are played by the provider SDK
//! and its pushed PCM is paced into the host's elementary stream; albums
//! are expanded into one playlist entry per track.
//!
//! The host talks to [`ConsumerFacade`] from its control thread. A
//! dedicated session thread owns the provider session for the lifetime of
//! the opened item.

pub mod config;
pub mod demux;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod metadata;
pub mod pacer;
pub mod playlist;
pub mod provider;
pub mod session;
pub mod uri;

#[cfg(test)]
mod test_utils;

pub use config::{Bitrate, Config};
pub use demux::{ConsumerFacade, ControlQuery, ControlReply, DemuxStatus, OpenContext};
pub use error::{Error, Result};
pub use host::{
    AudioBlock, Dialogs, EsId, EsOut, HostServices, PlaylistItem, PlaylistSink, StreamFormat,
};
pub use metadata::TrackMetadata;
pub use provider::{Provider, ProviderError};
pub use uri::{ItemKind, classify};
