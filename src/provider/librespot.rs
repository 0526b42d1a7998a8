//! [`Provider`] on top of librespot
//!
//! librespot is async; this adapter owns a tokio runtime, runs every
//! asynchronous call on it and reports completion as [`SessionEvent`]s
//! queued for the session thread. Decoded audio reaches the pacer through
//! [`PacerSink`], which blocks the player thread until the pacer accepts it.

use crossbeam_channel::{Receiver, Sender, unbounded};
use librespot::core::authentication::Credentials;
use librespot::core::cache::Cache;
use librespot::core::config::SessionConfig;
use librespot::core::error::ErrorKind;
use librespot::core::session::Session;
use librespot::core::spotify_uri::SpotifyUri;
use librespot::metadata::{Album, Metadata, Track};
use librespot::playback::audio_backend::{Sink, SinkResult};
use librespot::playback::config::{Bitrate as PlayerBitrate, PlayerConfig};
use librespot::playback::convert::Converter;
use librespot::playback::decoder::AudioPacket;
use librespot::playback::mixer::NoOpVolume;
use librespot::playback::player::{Player, PlayerEvent};
use librespot::playback::{NUM_CHANNELS, SAMPLE_RATE};
use librespot::protocol::authentication::AuthenticationType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use super::{
    AlbumBrowse, AudioDelivery, CredentialBlob, LoginCredentials, Provider, ProviderContext,
    ProviderError, SessionEvent, TrackInfo,
};
use crate::config::{Bitrate, Config};
use crate::host::StreamFormat;

const DEVICE_NAME: &str = "Spotify-Demux";
/// How long the session thread may sleep when nothing is queued
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Back-off when the pacer refuses a packet
const REFUSED_BACKOFF: Duration = Duration::from_millis(20);
const CREDENTIALS_FILE: &str = "credentials.json";

impl From<librespot::core::Error> for ProviderError {
    fn from(e: librespot::core::Error) -> Self {
        match e.kind {
            ErrorKind::Unauthenticated | ErrorKind::PermissionDenied => ProviderError::BadCredentials,
            ErrorKind::Unavailable | ErrorKind::DeadlineExceeded => ProviderError::Network(e.to_string()),
            ErrorKind::NotFound => ProviderError::Unavailable(e.to_string()),
            _ => ProviderError::Other(e.to_string()),
        }
    }
}

#[derive(Default)]
struct Inner {
    ctx: Option<ProviderContext>,
    session: Option<Session>,
    player: Option<Arc<Player>>,
    bitrate: Bitrate,
    /// Resolved tracks by canonical URI
    tracks: HashMap<String, TrackInfo>,
}

#[derive(Clone)]
struct EventQueue {
    tx: Sender<SessionEvent>,
    inner: Arc<Mutex<Inner>>,
}

impl EventQueue {
    /// Queue an event and wake the session thread
    fn push(&self, event: SessionEvent) {
        tracing::trace!(callback = event.name(), "Queueing provider callback");
        if self.tx.send(event).is_err() {
            return;
        }
        let notifier = self.inner.lock().ctx.as_ref().map(|ctx| ctx.notifier.clone());
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

pub struct LibrespotProvider {
    runtime: Runtime,
    cache: Cache,
    cache_dir: PathBuf,
    inner: Arc<Mutex<Inner>>,
    queue: EventQueue,
    rx: Receiver<SessionEvent>,
}

impl LibrespotProvider {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let cache_dir = config
            .cache_dir()
            .ok_or_else(|| anyhow::anyhow!("no cache directory available"))?;
        std::fs::create_dir_all(&cache_dir)?;
        let files = cache_dir.join("files");
        let cache = Cache::new(Some(&cache_dir), Some(&cache_dir), Some(&files), None)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("librespot")
            .build()?;

        let inner = Arc::new(Mutex::new(Inner::default()));
        let (tx, rx) = unbounded();

        Ok(Self {
            runtime,
            cache,
            cache_dir,
            queue: EventQueue {
                tx,
                inner: Arc::clone(&inner),
            },
            inner,
            rx,
        })
    }

    fn get_device_id() -> String {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        format!("{}-{}", DEVICE_NAME, hostname)
    }

    fn session(&self) -> Result<Session, ProviderError> {
        self.inner.lock().session.clone().ok_or(ProviderError::NoSession)
    }

    fn connect(&self, credentials: Credentials) {
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => {
                self.queue.push(SessionEvent::LoggedIn(Err(e)));
                return;
            }
        };
        let queue = self.queue.clone();
        let cache = self.cache.clone();

        self.runtime.spawn(async move {
            match session.connect(credentials, true).await {
                Ok(()) => {
                    tracing::info!(username = %session.username(), "Session connected");
                    if let Some(blob) = cache.credentials().and_then(to_blob) {
                        queue.push(SessionEvent::CredentialsUpdated(blob));
                    }
                    queue.push(SessionEvent::LoggedIn(Ok(())));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Session connect failed");
                    queue.push(SessionEvent::LoggedIn(Err(e.into())));
                }
            }
        });
    }

    fn spawn_player(&self, inner: &mut Inner) -> Result<Arc<Player>, ProviderError> {
        if let Some(player) = inner.player.as_ref() {
            return Ok(Arc::clone(player));
        }
        let session = inner.session.clone().ok_or(ProviderError::NoSession)?;
        let audio = inner
            .ctx
            .as_ref()
            .map(|ctx| ctx.audio.clone())
            .ok_or(ProviderError::NoSession)?;

        let player_config = PlayerConfig {
            bitrate: match inner.bitrate {
                Bitrate::Low => PlayerBitrate::Bitrate96,
                Bitrate::Medium => PlayerBitrate::Bitrate160,
                Bitrate::High => PlayerBitrate::Bitrate320,
            },
            ..Default::default()
        };

        let _guard = self.runtime.enter();
        let player = Player::new(player_config, session, Box::new(NoOpVolume), move || {
            Box::new(PacerSink::new(audio)) as Box<dyn Sink>
        });
        self.forward_player_events(&player);
        inner.player = Some(Arc::clone(&player));
        Ok(player)
    }

    fn forward_player_events(&self, player: &Player) {
        let mut event_channel = player.get_player_event_channel();
        let queue = self.queue.clone();
        tracing::info!("Starting librespot player event listener");

        self.runtime.spawn(async move {
            while let Some(event) = event_channel.recv().await {
                match event {
                    PlayerEvent::EndOfTrack { .. } => {
                        tracing::debug!("PlayerEvent::EndOfTrack");
                        queue.push(SessionEvent::EndOfTrack);
                    }
                    PlayerEvent::Unavailable { .. } => {
                        queue.push(SessionEvent::StreamingError(ProviderError::Unavailable(
                            "track unavailable".to_string(),
                        )));
                    }
                    PlayerEvent::SessionDisconnected { .. } => {
                        queue.push(SessionEvent::ConnectionError(ProviderError::Network(
                            "session disconnected".to_string(),
                        )));
                    }
                    PlayerEvent::TrackChanged { audio_item } => {
                        tracing::info!(
                            track = %audio_item.name,
                            duration_ms = audio_item.duration_ms,
                            "PlayerEvent::TrackChanged"
                        );
                    }
                    _ => tracing::trace!("PlayerEvent: other event received"),
                }
            }
        });
    }
}

fn to_blob(credentials: Credentials) -> Option<CredentialBlob> {
    Some(CredentialBlob {
        username: credentials.username?,
        data: credentials.auth_data,
    })
}

fn parse_uri(uri: &str) -> Result<SpotifyUri, ProviderError> {
    SpotifyUri::from_uri(uri).map_err(|e| ProviderError::Unavailable(format!("{uri}: {e}")))
}

async fn fetch_track(session: &Session, uri: &SpotifyUri) -> Result<TrackInfo, ProviderError> {
    let track = Track::get(session, uri).await?;
    let id = uri
        .to_uri()
        .map(|u| crate::uri::id_of(&u).to_string())
        .unwrap_or_default();
    Ok(TrackInfo {
        id,
        name: Some(track.name),
        artists: track.artists.iter().map(|a| a.name.clone()).collect(),
        album: Some(track.album.name),
        duration: u64::try_from(track.duration).ok().map(Duration::from_millis),
    })
}

impl Provider for LibrespotProvider {
    fn create_session(&self, ctx: ProviderContext) -> Result<(), ProviderError> {
        let session_config = SessionConfig {
            device_id: Self::get_device_id(),
            ..Default::default()
        };
        let _guard = self.runtime.enter();
        let session = Session::new(session_config, Some(self.cache.clone()));

        let mut inner = self.inner.lock();
        inner.ctx = Some(ctx);
        inner.session = Some(session);
        inner.tracks.clear();
        Ok(())
    }

    fn release_session(&self) {
        let mut inner = self.inner.lock();
        if let Some(player) = inner.player.take() {
            player.stop();
        }
        if let Some(session) = inner.session.take() {
            session.shutdown();
        }
        inner.ctx = None;
        inner.tracks.clear();
        while self.rx.try_recv().is_ok() {}
    }

    fn set_preferred_bitrate(&self, bitrate: Bitrate) -> Result<(), ProviderError> {
        self.inner.lock().bitrate = bitrate;
        Ok(())
    }

    fn remembered_user(&self) -> Option<String> {
        self.cache.credentials().and_then(|c| c.username)
    }

    fn login(&self, credentials: LoginCredentials) {
        let credentials = match credentials {
            LoginCredentials::Password { username, password } => Credentials::with_password(username, password),
            LoginCredentials::Blob(blob) => Credentials {
                username: Some(blob.username),
                auth_type: AuthenticationType::AUTHENTICATION_STORED_SPOTIFY_CREDENTIALS,
                auth_data: blob.data,
            },
        };
        self.connect(credentials);
    }

    fn relogin(&self) -> Result<(), ProviderError> {
        let credentials = self.cache.credentials().ok_or(ProviderError::NoSession)?;
        self.connect(credentials);
        Ok(())
    }

    fn logout(&self) {
        if let Some(session) = self.inner.lock().session.as_ref() {
            session.shutdown();
        }
        self.queue.push(SessionEvent::LoggedOut);
    }

    fn forget_me(&self) {
        let path = self.cache_dir.join(CREDENTIALS_FILE);
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, path = %path.display(), "Could not remove stored credentials");
        }
    }

    fn lookup_track(&self, uri: &str) -> Result<(), ProviderError> {
        let spotify_uri = parse_uri(uri)?;
        let session = self.session()?;
        let queue = self.queue.clone();
        let inner = Arc::clone(&self.inner);
        let key = uri.to_string();

        self.runtime.spawn(async move {
            match fetch_track(&session, &spotify_uri).await {
                Ok(info) => {
                    inner.lock().tracks.insert(key, info);
                    queue.push(SessionEvent::MetadataUpdated);
                }
                Err(e) => queue.push(SessionEvent::LookupFailed(e)),
            }
        });
        Ok(())
    }

    fn track_info(&self, uri: &str) -> Option<TrackInfo> {
        self.inner.lock().tracks.get(uri).cloned()
    }

    fn release_track(&self, uri: &str) {
        self.inner.lock().tracks.remove(uri);
    }

    fn browse_album(&self, uri: &str) -> Result<(), ProviderError> {
        let album_uri = parse_uri(uri)?;
        let session = self.session()?;
        let queue = self.queue.clone();
        let canonical = uri.to_string();

        self.runtime.spawn(async move {
            let result = async {
                let album = Album::get(&session, &album_uri).await?;
                let mut tracks = Vec::new();
                for track_uri in album.tracks() {
                    tracks.push(fetch_track(&session, track_uri).await?);
                }
                Ok::<_, ProviderError>(AlbumBrowse {
                    album_uri: canonical,
                    tracks,
                })
            }
            .await;
            queue.push(SessionEvent::AlbumBrowseComplete(result));
        });
        Ok(())
    }

    fn release_album(&self, _uri: &str) {}

    fn release_browse(&self, browse: AlbumBrowse) {
        tracing::trace!(album = %browse.album_uri, "Browse result released");
    }

    fn player_load(&self, uri: &str) -> Result<(), ProviderError> {
        let spotify_uri = parse_uri(uri)?;
        let mut inner = self.inner.lock();
        let player = self.spawn_player(&mut inner)?;
        player.load(spotify_uri, false, 0);
        Ok(())
    }

    fn player_play(&self, play: bool) {
        if let Some(player) = self.inner.lock().player.as_ref() {
            if play {
                player.play();
            } else {
                player.pause();
            }
        }
    }

    fn player_seek(&self, position: Duration) {
        if let Some(player) = self.inner.lock().player.as_ref() {
            player.seek(u32::try_from(position.as_millis()).unwrap_or(u32::MAX));
        }
    }

    fn player_unload(&self) {
        if let Some(player) = self.inner.lock().player.as_ref() {
            player.stop();
        }
    }

    fn process_events(&self, dispatch: &mut dyn FnMut(SessionEvent)) -> Duration {
        while let Ok(event) = self.rx.try_recv() {
            dispatch(event);
        }
        EVENT_POLL_INTERVAL
    }
}

/// Audio backend that hands decoded samples to the pacer
pub struct PacerSink {
    audio: AudioDelivery,
    format: StreamFormat,
}

impl PacerSink {
    fn new(audio: AudioDelivery) -> Self {
        Self {
            audio,
            format: StreamFormat {
                channels: u16::from(NUM_CHANNELS),
                sample_rate: SAMPLE_RATE,
            },
        }
    }
}

impl Sink for PacerSink {
    fn start(&mut self) -> SinkResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> SinkResult<()> {
        Ok(())
    }

    fn write(&mut self, packet: AudioPacket, converter: &mut Converter) -> SinkResult<()> {
        let Ok(samples) = packet.samples() else {
            return Ok(());
        };
        let s16 = converter.f64_to_s16(samples);
        let channels = usize::from(self.format.channels);
        let total = s16.len() / channels;

        // Refused deliveries are offered again until accepted or the host
        // stops taking audio.
        let mut done = 0;
        while done < total {
            let accepted = self.audio.deliver(self.format, &s16[done * channels..], total - done);
            if accepted == 0 {
                if self.audio.is_closed() {
                    break;
                }
                std::thread::sleep(REFUSED_BACKOFF);
            }
            done += accepted;
        }
        Ok(())
    }
}
