//! Expansion of an album into one playlist entry per track

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::host::{PlaylistItem, PlaylistSink};
use crate::metadata::TrackMetadata;
use crate::provider::{AlbumBrowse, Provider};
use crate::uri::{ItemKind, canonical_uri};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// Album tracks not fetched yet
    NotReady,
    /// This call published the list
    Published(usize),
    /// An earlier call already published it
    AlreadyPublished,
}

#[derive(Default)]
struct PlaylistState {
    ready: bool,
    browse: Option<AlbumBrowse>,
}

/// Playlist lock plus the browse result it protects
#[derive(Default)]
pub struct PlaylistExpander {
    state: Mutex<PlaylistState>,
}

impl PlaylistExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bulk result and flip the ready flag.
    ///
    /// A second result is handed back so the caller can release it.
    pub fn set_ready(&self, browse: AlbumBrowse) -> std::result::Result<(), AlbumBrowse> {
        let mut state = self.state.lock();
        if state.ready {
            return Err(browse);
        }
        tracing::debug!(album = %browse.album_uri, tracks = browse.tracks.len(), "Album tracks ready");
        state.browse = Some(browse);
        state.ready = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Publish the album's tracks to `sink`, exactly once.
    ///
    /// On allocation failure nothing is published and the browse result
    /// is kept for a later attempt.
    pub fn expand(
        &self,
        provider: &dyn Provider,
        metadata: &mut TrackMetadata,
        sink: &dyn PlaylistSink,
    ) -> Result<ExpandOutcome> {
        let mut state = self.state.lock();
        if !state.ready {
            return Ok(ExpandOutcome::NotReady);
        }
        let Some(browse) = state.browse.as_ref() else {
            return Ok(ExpandOutcome::AlreadyPublished);
        };

        let mut items = Vec::new();
        items
            .try_reserve_exact(browse.tracks.len())
            .map_err(|_| Error::OutOfMemory)?;

        for track in &browse.tracks {
            metadata.set_from(track);
            if let Some(uri) = canonical_uri(ItemKind::Track, &track.id) {
                items.push(PlaylistItem {
                    uri,
                    title: metadata.title.clone(),
                    artist: metadata.artist.clone(),
                    album: metadata.album.clone(),
                    duration: track.duration,
                });
            }
            metadata.clear();
        }

        let count = items.len();
        tracing::info!(count, "Publishing album tracks");
        sink.publish(items);

        if let Some(browse) = state.browse.take() {
            crate::provider_call!("release_browse");
            provider.release_browse(browse);
        }
        Ok(ExpandOutcome::Published(count))
    }

    /// Release a browse result that was never published
    pub fn release(&self, provider: &dyn Provider) {
        if let Some(browse) = self.state.lock().browse.take() {
            crate::provider_call!("release_browse");
            provider.release_browse(browse);
        }
    }
}
