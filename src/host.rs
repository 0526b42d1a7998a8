//! Interfaces the playback host provides to the demuxer

use std::sync::Arc;
use std::time::Duration;

/// Host default for the live-caching delay
pub const DEFAULT_LIVE_CACHING: Duration = Duration::from_millis(300);

/// User-facing dialogs
pub trait Dialogs: Send + Sync {
    /// Show an error the user has to acknowledge
    fn fatal(&self, title: &str, message: &str);

    /// Ask for a username and password. `None` when the user cancels.
    fn prompt_credentials(&self) -> Option<(String, String)>;
}

/// Identifier of an elementary stream added to the host output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EsId(pub u32);

/// Signed 16-bit interleaved PCM at the provider's rate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl StreamFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn bitrate(&self) -> u32 {
        self.sample_rate * u32::from(Self::BITS_PER_SAMPLE) * u32::from(self.channels)
    }
}

/// One chunk of audio handed to the host
#[derive(Clone, Debug)]
pub struct AudioBlock {
    pub pts: Duration,
    pub dts: Duration,
    pub length: Duration,
    /// Number of samples over all channels
    pub samples: usize,
    pub data: Vec<i16>,
}

/// Elementary stream output of the host pipeline
pub trait EsOut: Send + Sync {
    fn add(&self, format: &StreamFormat) -> Option<EsId>;
    fn del(&self, es: EsId);
    /// Clock reference update
    fn set_pcr(&self, pts: Duration);
    fn send(&self, es: EsId, block: AudioBlock);
}

/// A synthesized track entry for an expanded album
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistItem {
    pub uri: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
}

/// Receives the expanded album track list
pub trait PlaylistSink: Send + Sync {
    fn publish(&self, items: Vec<PlaylistItem>);
}

/// Everything the host hands to [`crate::demux::ConsumerFacade::open`]
#[derive(Clone)]
pub struct HostServices {
    pub dialogs: Arc<dyn Dialogs>,
    pub es_out: Arc<dyn EsOut>,
    pub playlist: Arc<dyn PlaylistSink>,
    /// Reported for the pts delay query
    pub live_caching: Duration,
}

impl HostServices {
    pub fn new(
        dialogs: Arc<dyn Dialogs>,
        es_out: Arc<dyn EsOut>,
        playlist: Arc<dyn PlaylistSink>,
    ) -> Self {
        Self {
            dialogs,
            es_out,
            playlist,
            live_caching: DEFAULT_LIVE_CACHING,
        }
    }

    pub fn with_live_caching(mut self, live_caching: Duration) -> Self {
        self.live_caching = live_caching;
        self
    }
}
