//! Pull interface exposed to the host pipeline
//!
//! [`ConsumerFacade::open`] blocks until the session thread has logged in
//! and the item is playable (or has failed), [`ConsumerFacade::demux_tick`]
//! is called repeatedly by the host, and [`ConsumerFacade::control`]
//! answers transport and metadata queries. Closing drives the cleanup
//! barrier and stops the session thread.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::HostServices;
use crate::lifecycle::{Lifecycle, START_STOP_TIMEOUT, StartupOutcome};
use crate::metadata::TrackMetadata;
use crate::pacer::AudioPacer;
use crate::playlist::{ExpandOutcome, PlaylistExpander};
use crate::provider::Provider;
use crate::session::{DriverHandle, DriverShared, SessionDriver, SessionSlot};
use crate::uri::{ItemKind, classify};

/// Pause between demux ticks so the host loop does not spin
pub const DEMUX_TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxStatus {
    MoreData,
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlQuery {
    CanPause,
    CanSeek,
    SetPauseState(bool),
    SetTime(Duration),
    GetTime,
    GetPosition,
    /// Fraction of the length, 0.0 to 1.0
    SetPosition(f64),
    GetPtsDelay,
    GetLength,
    CanControlPace,
    CanControlRate,
    GetMeta,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControlReply {
    Done,
    Flag(bool),
    Time(Duration),
    Position(f64),
    Meta(TrackMetadata),
}

/// Everything needed to open an item
#[derive(Clone)]
pub struct OpenContext {
    pub config: Config,
    pub provider: Arc<dyn Provider>,
    pub host: HostServices,
    pub slot: Arc<SessionSlot>,
}

impl OpenContext {
    pub fn new(config: Config, provider: Arc<dyn Provider>, host: HostServices) -> Self {
        Self {
            config,
            provider,
            host,
            slot: SessionSlot::global(),
        }
    }

    pub fn with_session_slot(mut self, slot: Arc<SessionSlot>) -> Self {
        self.slot = slot;
        self
    }
}

pub struct ConsumerFacade {
    kind: ItemKind,
    uri: String,
    provider: Arc<dyn Provider>,
    host: HostServices,
    lifecycle: Arc<Lifecycle>,
    pacer: Arc<AudioPacer>,
    playlist: Arc<PlaylistExpander>,
    metadata: TrackMetadata,
    driver: Option<DriverHandle>,
    closed: bool,
}

impl ConsumerFacade {
    /// Open a track or album URI.
    ///
    /// Unsupported URIs are rejected before any thread is started. On
    /// startup failure or timeout the session is torn down before
    /// returning.
    pub fn open(uri: &str, ctx: OpenContext) -> Result<Self> {
        let (kind, canonical) = classify(uri);
        if kind == ItemKind::Unknown {
            tracing::debug!(uri, "Not a Spotify track or album");
            return Err(Error::UnsupportedUri(uri.to_string()));
        }
        tracing::debug!(uri = %canonical, ?kind, "Opening");

        let token = ctx.slot.acquire()?;

        let lifecycle = Arc::new(Lifecycle::new());
        let pacer = Arc::new(AudioPacer::new(Arc::clone(&ctx.host.es_out)));
        let playlist = Arc::new(PlaylistExpander::new());

        let driver = SessionDriver::new(
            token,
            Arc::clone(&ctx.provider),
            Arc::clone(&ctx.host.dialogs),
            DriverShared {
                lifecycle: Arc::clone(&lifecycle),
                pacer: Arc::clone(&pacer),
                playlist: Arc::clone(&playlist),
            },
            ctx.config,
            kind,
            canonical.clone(),
        )
        .spawn()?;

        let mut facade = Self {
            kind,
            uri: canonical,
            provider: ctx.provider,
            host: ctx.host,
            lifecycle,
            pacer,
            playlist,
            metadata: TrackMetadata::default(),
            driver: Some(driver),
            closed: false,
        };

        match facade.lifecycle.wait_startup(START_STOP_TIMEOUT) {
            StartupOutcome::Succeeded => {
                tracing::info!(uri = %facade.uri, "Started successfully");
                Ok(facade)
            }
            StartupOutcome::Failed => {
                tracing::debug!("Failed to start");
                facade.close();
                Err(Error::StartupFailed)
            }
            StartupOutcome::TimedOut => {
                tracing::debug!("Timed out waiting for startup");
                facade.close();
                Err(Error::StartupTimeout)
            }
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Canonical URI of the opened item
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// One host pull.
    ///
    /// Tracks report EOF once the output stream is gone after audio had
    /// started. Albums publish their track list on the first pull after
    /// it is available and then report EOF.
    pub fn demux_tick(&mut self) -> Result<DemuxStatus> {
        match self.kind {
            ItemKind::Album => {
                let outcome = self.playlist.expand(
                    self.provider.as_ref(),
                    &mut self.metadata,
                    self.host.playlist.as_ref(),
                )?;
                match outcome {
                    ExpandOutcome::NotReady => {
                        thread::sleep(DEMUX_TICK);
                        Ok(DemuxStatus::MoreData)
                    }
                    ExpandOutcome::Published(_) | ExpandOutcome::AlreadyPublished => Ok(DemuxStatus::Eof),
                }
            }
            _ => {
                if self.pacer.is_eof() {
                    return Ok(DemuxStatus::Eof);
                }
                thread::sleep(DEMUX_TICK);
                Ok(DemuxStatus::MoreData)
            }
        }
    }

    pub fn control(&mut self, query: ControlQuery) -> Result<ControlReply> {
        if self.kind != ItemKind::Track {
            return Err(Error::UnsupportedControl);
        }

        let provider = self.provider.as_ref();
        let reply = match query {
            ControlQuery::CanPause
            | ControlQuery::CanSeek
            | ControlQuery::CanControlPace
            | ControlQuery::CanControlRate => ControlReply::Flag(true),
            ControlQuery::SetPauseState(paused) => {
                self.pacer.set_paused(provider, paused);
                ControlReply::Done
            }
            ControlQuery::SetTime(time) => {
                self.pacer.seek(provider, time);
                ControlReply::Done
            }
            ControlQuery::SetPosition(fraction) => {
                if !self.pacer.seek_fraction(provider, fraction) {
                    return Err(Error::UnsupportedControl);
                }
                ControlReply::Done
            }
            ControlQuery::GetTime => ControlReply::Time(self.pacer.time()),
            ControlQuery::GetPosition => ControlReply::Position(self.pacer.position()),
            ControlQuery::GetLength => ControlReply::Time(self.pacer.duration().unwrap_or_default()),
            ControlQuery::GetPtsDelay => ControlReply::Time(self.host.live_caching),
            ControlQuery::GetMeta => {
                if let Some(info) = provider.track_info(&self.uri) {
                    self.metadata.set_from(&info);
                }
                ControlReply::Meta(self.metadata.clone())
            }
        };
        Ok(reply)
    }

    /// Tear everything down. Safe to call more than once; never fails.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!("Closing down");

        if !self.lifecycle.request_cleanup(START_STOP_TIMEOUT) {
            tracing::warn!("Logout not confirmed before deadline");
        }

        if let Some(mut driver) = self.driver.take() {
            driver.shutdown(&self.lifecycle, START_STOP_TIMEOUT);
        }

        self.pacer.teardown();
        self.metadata.clear();
        tracing::debug!("Closed successfully");
    }
}

impl Drop for ConsumerFacade {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StreamFormat;
    use crate::lifecycle::CleanupState;
    use crate::provider::{AlbumBrowse, ProviderError, TrackInfo};
    use crate::test_utils::{ScriptedProvider, TestHost, album_browse, track_info};
    use std::time::Instant;

    const TRACK: &str = "spotify:track:6wNTqBF2Y69KG9EPyj9YJD";
    const ALBUM: &str = "spotify:album:7GTYvV0u1AqBc8djyZdhuv";

    fn context(provider: &Arc<ScriptedProvider>, host: &TestHost) -> OpenContext {
        let config = Config {
            username: "someone".to_string(),
            password: Some("secret".to_string()),
            ..Config::default()
        };
        OpenContext::new(config, provider.clone(), host.services()).with_session_slot(SessionSlot::new())
    }

    #[test]
    fn test_unknown_uri_spawns_nothing() {
        let provider = Arc::new(ScriptedProvider::default());
        let host = TestHost::default();
        let result = ConsumerFacade::open("spotify:artist:6wNTqBF2Y69KG9EPyj9YJD", context(&provider, &host));
        assert!(matches!(result, Err(Error::UnsupportedUri(_))));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_open_track_and_close() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let ctx = context(&provider, &host);
        let slot = Arc::clone(&ctx.slot);

        let mut facade = ConsumerFacade::open(TRACK, ctx).unwrap();
        assert!(slot.is_live());
        assert_eq!(provider.play_calls(), vec![true]);
        assert_eq!(
            facade.control(ControlQuery::GetLength).unwrap(),
            ControlReply::Time(Duration::from_secs(180))
        );

        match facade.control(ControlQuery::GetMeta).unwrap() {
            ControlReply::Meta(meta) => {
                assert_eq!(meta.title.as_deref(), Some("Song"));
                assert_eq!(meta.artist.as_deref(), Some("Artist"));
                assert_eq!(meta.album.as_deref(), Some("Record"));
            }
            other => panic!("unexpected reply {other:?}"),
        }

        facade.close();
        assert_eq!(facade.lifecycle.cleanup_state(), CleanupState::Done);
        assert!(provider.calls().contains(&"logout".to_string()));
        assert!(provider.calls().contains(&"player_unload".to_string()));
        assert_eq!(provider.sessions_released(), 1);
        assert!(!slot.is_live());

        // Second close is a no-op
        facade.close();
        assert_eq!(provider.sessions_released(), 1);
    }

    #[test]
    fn test_login_failure_returns_before_deadline() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        provider.fail_login(ProviderError::BadCredentials);
        let host = TestHost::default();

        let started = Instant::now();
        let result = ConsumerFacade::open(TRACK, context(&provider, &host));
        assert!(matches!(result, Err(Error::StartupFailed)));
        assert!(started.elapsed() < START_STOP_TIMEOUT);
        assert_eq!(host.dialogs.fatals().len(), 1);
        assert!(provider.calls().contains(&"forget_me".to_string()));
        assert!(!provider.calls().contains(&"logout".to_string()));
        assert_eq!(provider.sessions_released(), 1);
    }

    #[test]
    fn test_prompt_used_without_identity() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        host.dialogs.answer_prompt("typed", "secret");
        let ctx = OpenContext::new(Config::default(), provider.clone(), host.services())
            .with_session_slot(SessionSlot::new());

        let facade = ConsumerFacade::open(TRACK, ctx).unwrap();
        assert_eq!(host.dialogs.prompts(), 1);
        assert_eq!(provider.logins(), vec!["typed".to_string()]);
        drop(facade);
    }

    #[test]
    fn test_remembered_user_relogs_in() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        provider.remember_user("someone");
        let host = TestHost::default();

        let facade = ConsumerFacade::open(TRACK, context(&provider, &host)).unwrap();
        let calls = provider.calls();
        assert!(calls.contains(&"relogin".to_string()));
        assert!(!calls.contains(&"login".to_string()));
        assert_eq!(host.dialogs.prompts(), 0);
        drop(facade);
    }

    #[test]
    fn test_cancelled_prompt_fails_open() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let ctx = OpenContext::new(Config::default(), provider.clone(), host.services())
            .with_session_slot(SessionSlot::new());

        let result = ConsumerFacade::open(TRACK, ctx);
        assert!(matches!(result, Err(Error::StartupFailed)));
        assert!(provider.logins().is_empty());
    }

    #[test]
    fn test_cached_blob_preferred_on_next_open() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let ctx = context(&provider, &host);
        let slot = Arc::clone(&ctx.slot);

        drop(ConsumerFacade::open(TRACK, ctx.clone()).unwrap());
        drop(ConsumerFacade::open(TRACK, ctx).unwrap());

        assert_eq!(provider.blob_logins(), 1);
        assert!(!slot.is_live());
    }

    #[test]
    fn test_second_session_rejected() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let ctx = context(&provider, &host);

        let first = ConsumerFacade::open(TRACK, ctx.clone()).unwrap();
        assert!(matches!(ConsumerFacade::open(TRACK, ctx), Err(Error::SessionBusy)));
        drop(first);
    }

    #[test]
    fn test_track_reaches_eof_after_end_of_track() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let mut facade = ConsumerFacade::open(TRACK, context(&provider, &host)).unwrap();

        let format = StreamFormat {
            channels: 2,
            sample_rate: 44_100,
        };
        assert_eq!(provider.deliver(format, &vec![0; 882], 441), 441);
        assert_eq!(facade.demux_tick().unwrap(), DemuxStatus::MoreData);

        provider.end_of_track();
        let deadline = Instant::now() + START_STOP_TIMEOUT;
        while facade.demux_tick().unwrap() != DemuxStatus::Eof {
            assert!(Instant::now() < deadline, "no EOF after end of track");
        }
        assert_eq!(host.es_out.removed().len(), 1);
    }

    #[test]
    fn test_transport_controls() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let mut facade = ConsumerFacade::open(TRACK, context(&provider, &host)).unwrap();

        assert_eq!(facade.control(ControlQuery::CanSeek).unwrap(), ControlReply::Flag(true));
        assert_eq!(
            facade.control(ControlQuery::GetPtsDelay).unwrap(),
            ControlReply::Time(crate::host::DEFAULT_LIVE_CACHING)
        );

        facade.control(ControlQuery::SetTime(Duration::from_secs(30))).unwrap();
        assert_eq!(facade.control(ControlQuery::GetTime).unwrap(), ControlReply::Time(Duration::from_secs(30)));

        facade.control(ControlQuery::SetPosition(0.5)).unwrap();
        assert_eq!(provider.seeks(), vec![Duration::from_secs(30), Duration::from_secs(90)]);
        assert_eq!(facade.control(ControlQuery::GetPosition).unwrap(), ControlReply::Position(0.5));

        facade.control(ControlQuery::SetPauseState(true)).unwrap();
        facade.control(ControlQuery::SetPauseState(false)).unwrap();
        assert_eq!(provider.play_calls(), vec![true, false, true]);
    }

    #[test]
    fn test_non_finite_position_unsupported() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        let host = TestHost::default();
        let mut facade = ConsumerFacade::open(TRACK, context(&provider, &host)).unwrap();

        assert!(matches!(
            facade.control(ControlQuery::SetPosition(f64::NAN)),
            Err(Error::UnsupportedControl)
        ));
        assert!(provider.seeks().is_empty());
    }

    #[test]
    fn test_failed_lookup_fails_open_fast() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        provider.fail_lookup(ProviderError::Unavailable("region locked".to_string()));
        let host = TestHost::default();
        let ctx = context(&provider, &host);
        let slot = Arc::clone(&ctx.slot);

        let started = Instant::now();
        let result = ConsumerFacade::open(TRACK, ctx);
        assert!(matches!(result, Err(Error::StartupFailed)));
        assert!(started.elapsed() < START_STOP_TIMEOUT);
        assert_eq!(host.dialogs.fatals().len(), 1);
        assert!(!provider.calls().contains(&"player_load".to_string()));
        assert!(provider.calls().contains(&"logout".to_string()));
        assert_eq!(provider.sessions_released(), 1);
        assert!(!slot.is_live());
    }

    #[test]
    fn test_stalled_login_times_out_silently() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        provider.stall_login();
        let host = TestHost::default();
        let ctx = context(&provider, &host);
        let slot = Arc::clone(&ctx.slot);

        let started = Instant::now();
        let result = ConsumerFacade::open(TRACK, ctx);
        assert!(matches!(result, Err(Error::StartupTimeout)));
        assert!(started.elapsed() >= START_STOP_TIMEOUT);
        assert!(host.dialogs.fatals().is_empty());
        assert!(provider.calls().contains(&"logout".to_string()));
        assert_eq!(provider.sessions_released(), 1);
        assert!(!slot.is_live());
    }

    #[test]
    fn test_album_expands_once() {
        let browse: AlbumBrowse = album_browse(ALBUM, 4);
        let provider = Arc::new(ScriptedProvider::with_album(browse));
        let host = TestHost::default();
        let mut facade = ConsumerFacade::open(ALBUM, context(&provider, &host)).unwrap();

        assert!(matches!(facade.control(ControlQuery::CanPause), Err(Error::UnsupportedControl)));

        assert_eq!(facade.demux_tick().unwrap(), DemuxStatus::Eof);
        assert_eq!(facade.demux_tick().unwrap(), DemuxStatus::Eof);

        let published = host.playlist.published();
        assert_eq!(published.len(), 1);
        let uris: Vec<_> = published[0].iter().map(|item| item.uri.clone()).collect();
        let expected: Vec<_> = (0..4).map(|i| format!("spotify:track:{i:0>22}")).collect();
        assert_eq!(uris, expected);
        assert_eq!(provider.browses_released(), 1);

        facade.close();
        assert_eq!(provider.browses_released(), 1);
        assert!(provider.calls().contains(&"release_album".to_string()));
    }

    #[test]
    fn test_web_link_opens_canonical_track() {
        let provider = Arc::new(ScriptedProvider::with_track(TrackInfo {
            duration: None,
            ..track_info("6wNTqBF2Y69KG9EPyj9YJD")
        }));
        let host = TestHost::default();
        let facade = ConsumerFacade::open("open.spotify.com/track/6wNTqBF2Y69KG9EPyj9YJD", context(&provider, &host)).unwrap();
        assert_eq!(facade.uri(), TRACK);
        assert_eq!(facade.kind(), ItemKind::Track);
    }

    #[test]
    fn test_unconfirmed_logout_still_closes() {
        let provider = Arc::new(ScriptedProvider::with_track(track_info("6wNTqBF2Y69KG9EPyj9YJD")));
        provider.ignore_logout();
        let host = TestHost::default();
        let ctx = context(&provider, &host);
        let slot = Arc::clone(&ctx.slot);
        let mut facade = ConsumerFacade::open(TRACK, ctx).unwrap();

        let started = Instant::now();
        facade.close();
        assert!(started.elapsed() < START_STOP_TIMEOUT * 2 + Duration::from_secs(1));
        assert_eq!(facade.lifecycle.cleanup_state(), CleanupState::InProgress);
        assert_eq!(provider.sessions_released(), 1);
        assert!(!slot.is_live());
    }
}
