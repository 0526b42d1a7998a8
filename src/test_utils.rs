//! Test doubles for the host and the provider SDK.
//!
//! [`ScriptedProvider`] behaves like a well-mannered SDK: asynchronous
//! calls queue a [`SessionEvent`], wake the session thread through the
//! [`Notifier`] and are dispatched on the next `process_events`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::Bitrate;
use crate::host::{
    AudioBlock, Dialogs, EsId, EsOut, HostServices, PlaylistItem, PlaylistSink, StreamFormat,
};
use crate::provider::{
    AlbumBrowse, CredentialBlob, LoginCredentials, Provider, ProviderContext, ProviderError,
    SessionEvent, TrackInfo,
};

/// Delay `ScriptedProvider::process_events` asks for between pumps
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// A resolvable track named "Song" by "Artist" on "Record", 3 minutes long.
pub fn track_info(id: &str) -> TrackInfo {
    TrackInfo {
        id: id.to_string(),
        name: Some("Song".to_string()),
        artists: vec!["Artist".to_string()],
        album: Some("Record".to_string()),
        duration: Some(Duration::from_secs(180)),
    }
}

/// An album of `n` tracks with ids `000...0`, `000...1` and so on.
pub fn album_browse(album_uri: &str, n: usize) -> AlbumBrowse {
    AlbumBrowse {
        album_uri: album_uri.to_string(),
        tracks: (0..n)
            .map(|i| TrackInfo {
                name: Some(format!("Track {i}")),
                ..track_info(&format!("{i:0>22}"))
            })
            .collect(),
    }
}

// ============================================================================
// Host doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingEsOut {
    next_id: AtomicU32,
    added: Mutex<Vec<StreamFormat>>,
    removed: Mutex<Vec<EsId>>,
    blocks: Mutex<Vec<AudioBlock>>,
}

impl RecordingEsOut {
    pub fn added(&self) -> Vec<StreamFormat> {
        self.added.lock().clone()
    }

    pub fn removed(&self) -> Vec<EsId> {
        self.removed.lock().clone()
    }

    pub fn blocks(&self) -> Vec<AudioBlock> {
        self.blocks.lock().clone()
    }
}

impl EsOut for RecordingEsOut {
    fn add(&self, format: &StreamFormat) -> Option<EsId> {
        self.added.lock().push(*format);
        Some(EsId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn del(&self, es: EsId) {
        self.removed.lock().push(es);
    }

    fn set_pcr(&self, _pts: Duration) {}

    fn send(&self, _es: EsId, block: AudioBlock) {
        self.blocks.lock().push(block);
    }
}

#[derive(Default)]
pub struct RecordingDialogs {
    fatals: Mutex<Vec<(String, String)>>,
    answer: Mutex<Option<(String, String)>>,
    prompts: AtomicUsize,
}

impl RecordingDialogs {
    /// Credentials the next prompts will return; prompts are cancelled
    /// until this is called.
    pub fn answer_prompt(&self, username: &str, password: &str) {
        *self.answer.lock() = Some((username.to_string(), password.to_string()));
    }

    pub fn fatals(&self) -> Vec<(String, String)> {
        self.fatals.lock().clone()
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::Relaxed)
    }
}

impl Dialogs for RecordingDialogs {
    fn fatal(&self, title: &str, message: &str) {
        self.fatals.lock().push((title.to_string(), message.to_string()));
    }

    fn prompt_credentials(&self) -> Option<(String, String)> {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        self.answer.lock().clone()
    }
}

#[derive(Default)]
pub struct RecordingPlaylist {
    published: Mutex<Vec<Vec<PlaylistItem>>>,
}

impl RecordingPlaylist {
    pub fn published(&self) -> Vec<Vec<PlaylistItem>> {
        self.published.lock().clone()
    }
}

impl PlaylistSink for RecordingPlaylist {
    fn publish(&self, items: Vec<PlaylistItem>) {
        self.published.lock().push(items);
    }
}

/// All three host doubles, kept typed so tests can inspect them
#[derive(Clone, Default)]
pub struct TestHost {
    pub dialogs: Arc<RecordingDialogs>,
    pub es_out: Arc<RecordingEsOut>,
    pub playlist: Arc<RecordingPlaylist>,
}

impl TestHost {
    pub fn services(&self) -> HostServices {
        HostServices::new(self.dialogs.clone(), self.es_out.clone(), self.playlist.clone())
    }
}

// ============================================================================
// Provider double
// ============================================================================

#[derive(Default)]
struct Script {
    track: Option<TrackInfo>,
    album: Option<AlbumBrowse>,
    login_error: Option<ProviderError>,
    lookup_error: Option<ProviderError>,
    stall_login: bool,
    remembered_user: Option<String>,
    ignore_logout: bool,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<String>,
    logins: Vec<String>,
    blob_logins: usize,
    play_calls: Vec<bool>,
    seeks: Vec<Duration>,
    browses_released: usize,
    sessions_released: usize,
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    recorded: Mutex<Recorded>,
    ctx: Mutex<Option<ProviderContext>>,
    queue: Mutex<VecDeque<SessionEvent>>,
    metadata_loaded: AtomicBool,
}

impl ScriptedProvider {
    pub fn with_track(track: TrackInfo) -> Self {
        let provider = Self::default();
        provider.script.lock().track = Some(track);
        provider
    }

    pub fn with_album(album: AlbumBrowse) -> Self {
        let provider = Self::default();
        provider.script.lock().album = Some(album);
        provider
    }

    pub fn fail_login(&self, error: ProviderError) {
        self.script.lock().login_error = Some(error);
    }

    /// Lookups are accepted but fail later, as a network fetch would
    pub fn fail_lookup(&self, error: ProviderError) {
        self.script.lock().lookup_error = Some(error);
    }

    /// Logins are accepted but never complete
    pub fn stall_login(&self) {
        self.script.lock().stall_login = true;
    }

    pub fn remember_user(&self, username: &str) {
        self.script.lock().remembered_user = Some(username.to_string());
    }

    /// Never confirm a logout
    pub fn ignore_logout(&self) {
        self.script.lock().ignore_logout = true;
    }

    /// Push audio the way the SDK's delivery thread would
    pub fn deliver(&self, format: StreamFormat, frames: &[i16], num_frames: usize) -> usize {
        let audio = self.ctx.lock().as_ref().map(|ctx| ctx.audio.clone());
        audio.map_or(0, |audio| audio.deliver(format, frames, num_frames))
    }

    pub fn end_of_track(&self) {
        self.push(SessionEvent::EndOfTrack);
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded.lock().calls.clone()
    }

    /// Usernames of every login issued, blob or password
    pub fn logins(&self) -> Vec<String> {
        self.recorded.lock().logins.clone()
    }

    pub fn blob_logins(&self) -> usize {
        self.recorded.lock().blob_logins
    }

    pub fn play_calls(&self) -> Vec<bool> {
        self.recorded.lock().play_calls.clone()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.recorded.lock().seeks.clone()
    }

    pub fn browses_released(&self) -> usize {
        self.recorded.lock().browses_released
    }

    pub fn sessions_released(&self) -> usize {
        self.recorded.lock().sessions_released
    }

    fn record(&self, call: &str) {
        self.recorded.lock().calls.push(call.to_string());
    }

    fn push(&self, event: SessionEvent) {
        self.queue.lock().push_back(event);
        let notifier = self.ctx.lock().as_ref().map(|ctx| ctx.notifier.clone());
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl Provider for ScriptedProvider {
    fn create_session(&self, ctx: ProviderContext) -> Result<(), ProviderError> {
        self.record("create_session");
        self.metadata_loaded.store(false, Ordering::Release);
        self.queue.lock().clear();
        *self.ctx.lock() = Some(ctx);
        Ok(())
    }

    fn release_session(&self) {
        self.record("release_session");
        self.recorded.lock().sessions_released += 1;
        *self.ctx.lock() = None;
    }

    fn set_preferred_bitrate(&self, _bitrate: Bitrate) -> Result<(), ProviderError> {
        self.record("set_preferred_bitrate");
        Ok(())
    }

    fn remembered_user(&self) -> Option<String> {
        self.script.lock().remembered_user.clone()
    }

    fn login(&self, credentials: LoginCredentials) {
        self.record("login");
        let username = credentials.username().to_string();
        {
            let mut recorded = self.recorded.lock();
            recorded.logins.push(username.clone());
            if matches!(credentials, LoginCredentials::Blob(_)) {
                recorded.blob_logins += 1;
            }
        }

        let (error, stalled) = {
            let script = self.script.lock();
            (script.login_error.clone(), script.stall_login)
        };
        match error {
            _ if stalled => {}
            Some(e) => self.push(SessionEvent::LoggedIn(Err(e))),
            None => {
                self.push(SessionEvent::CredentialsUpdated(CredentialBlob {
                    username,
                    data: b"blob".to_vec(),
                }));
                self.push(SessionEvent::LoggedIn(Ok(())));
            }
        }
    }

    fn relogin(&self) -> Result<(), ProviderError> {
        self.record("relogin");
        match self.script.lock().remembered_user.clone() {
            Some(user) => {
                self.recorded.lock().logins.push(user);
                self.push(SessionEvent::LoggedIn(Ok(())));
                Ok(())
            }
            None => Err(ProviderError::NoSession),
        }
    }

    fn logout(&self) {
        self.record("logout");
        if !self.script.lock().ignore_logout {
            self.push(SessionEvent::LoggedOut);
        }
    }

    fn forget_me(&self) {
        self.record("forget_me");
        self.script.lock().remembered_user = None;
    }

    fn lookup_track(&self, uri: &str) -> Result<(), ProviderError> {
        self.record("lookup_track");
        if self.script.lock().track.is_none() {
            return Err(ProviderError::Unavailable(uri.to_string()));
        }
        let lookup_error = self.script.lock().lookup_error.clone();
        match lookup_error {
            Some(e) => self.push(SessionEvent::LookupFailed(e)),
            None => self.push(SessionEvent::MetadataUpdated),
        }
        Ok(())
    }

    fn track_info(&self, _uri: &str) -> Option<TrackInfo> {
        if !self.metadata_loaded.load(Ordering::Acquire) {
            return None;
        }
        self.script.lock().track.clone()
    }

    fn release_track(&self, _uri: &str) {
        self.record("release_track");
    }

    fn browse_album(&self, uri: &str) -> Result<(), ProviderError> {
        self.record("browse_album");
        let album = self.script.lock().album.clone();
        let result = album.ok_or_else(|| ProviderError::Unavailable(uri.to_string()));
        self.push(SessionEvent::AlbumBrowseComplete(result));
        Ok(())
    }

    fn release_album(&self, _uri: &str) {
        self.record("release_album");
    }

    fn release_browse(&self, _browse: AlbumBrowse) {
        self.record("release_browse");
        self.recorded.lock().browses_released += 1;
    }

    fn player_load(&self, _uri: &str) -> Result<(), ProviderError> {
        self.record("player_load");
        Ok(())
    }

    fn player_play(&self, play: bool) {
        self.record("player_play");
        self.recorded.lock().play_calls.push(play);
    }

    fn player_seek(&self, position: Duration) {
        self.record("player_seek");
        self.recorded.lock().seeks.push(position);
    }

    fn player_unload(&self) {
        self.record("player_unload");
    }

    fn process_events(&self, dispatch: &mut dyn FnMut(SessionEvent)) -> Duration {
        loop {
            let Some(event) = self.queue.lock().pop_front() else {
                break;
            };
            if matches!(event, SessionEvent::MetadataUpdated) {
                self.metadata_loaded.store(true, Ordering::Release);
            }
            dispatch(event);
        }
        PUMP_INTERVAL
    }
}
