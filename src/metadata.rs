//! Now-playing metadata for the active track

use crate::provider::TrackInfo;

/// Title, artist and album of one track.
///
/// Fields are filled first-write-wins while bound to one track and reset
/// with [`TrackMetadata::clear`] before moving to another.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TrackMetadata {
    /// Fill missing fields from the track's accessors.
    ///
    /// Does nothing while the track name is not resolvable yet; the caller
    /// retries on a later query.
    pub fn set_from(&mut self, info: &TrackInfo) {
        let Some(name) = info.name.as_ref() else {
            return;
        };

        if self.title.is_none() {
            self.title = Some(name.clone());
        }
        if self.album.is_none() {
            self.album = info.album.clone();
        }
        // Only the first listed artist
        if self.artist.is_none() {
            self.artist = info.artists.first().cloned();
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}
