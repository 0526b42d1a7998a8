//! Session thread: owns the provider session and pumps its events
//!
//! The provider allows one live session per process. That constraint is
//! a [`SessionSlot`] handing out a single [`SessionToken`] at a time; the
//! token also carries the in-process credential cache.

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::Dialogs;
use crate::lifecycle::{CancelToken, CleanupState, Lifecycle};
use crate::pacer::AudioPacer;
use crate::playlist::PlaylistExpander;
use crate::provider::{
    AudioDelivery, CredentialBlob, LoginCredentials, Notifier, Provider, ProviderContext,
    SessionEvent,
};
use crate::uri::ItemKind;

const THREAD_NAME: &str = "spotify-session";

#[derive(Default)]
struct SlotState {
    live: bool,
    credentials: Option<CredentialBlob>,
}

/// Owner of the one-session-per-process right and the credential cache
#[derive(Default)]
pub struct SessionSlot {
    state: Mutex<SlotState>,
}

impl SessionSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide slot
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SessionSlot>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(SessionSlot::new))
    }

    pub fn acquire(self: &Arc<Self>) -> Result<SessionToken> {
        let mut state = self.state.lock();
        if state.live {
            return Err(Error::SessionBusy);
        }
        state.live = true;
        Ok(SessionToken {
            slot: Arc::clone(self),
        })
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().live
    }
}

/// Proof of owning the live session; released on drop
pub struct SessionToken {
    slot: Arc<SessionSlot>,
}

impl SessionToken {
    pub fn cached_credentials(&self) -> Option<CredentialBlob> {
        self.slot.state.lock().credentials.clone()
    }

    /// Replace the cached re-login blob
    pub fn store_credentials(&self, blob: CredentialBlob) {
        self.slot.state.lock().credentials = Some(blob);
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        self.slot.state.lock().live = false;
    }
}

/// What the session is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActiveItem {
    Track { uri: String, duration: Option<Duration> },
    Album { uri: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoginStatus {
    NotIssued,
    Pending,
    LoggedIn,
    Failed,
}

/// Shared state the driver reports into
#[derive(Clone)]
pub struct DriverShared {
    pub lifecycle: Arc<Lifecycle>,
    pub pacer: Arc<AudioPacer>,
    pub playlist: Arc<PlaylistExpander>,
}

pub struct SessionDriver {
    token: SessionToken,
    provider: Arc<dyn Provider>,
    dialogs: Arc<dyn Dialogs>,
    shared: DriverShared,
    config: Config,
    kind: ItemKind,
    uri: String,
    active: Option<ActiveItem>,
    session_created: bool,
    login: LoginStatus,
    player_loaded: bool,
}

impl SessionDriver {
    pub fn new(
        token: SessionToken,
        provider: Arc<dyn Provider>,
        dialogs: Arc<dyn Dialogs>,
        shared: DriverShared,
        config: Config,
        kind: ItemKind,
        uri: String,
    ) -> Self {
        Self {
            token,
            provider,
            dialogs,
            shared,
            config,
            kind,
            uri,
            active: None,
            session_created: false,
            login: LoginStatus::NotIssued,
            player_loaded: false,
        }
    }

    /// Start the session thread
    pub fn spawn(self) -> Result<DriverHandle> {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();
        // Dropped when the thread ends, however it ends
        let (exit_tx, exit_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let _exit = exit_tx;
                self.run(thread_cancel);
            })
            .map_err(Error::Spawn)?;

        Ok(DriverHandle {
            thread: Some(thread),
            exited: exit_rx,
            cancel,
        })
    }

    fn run(mut self, cancel: CancelToken) {
        if let Err(e) = self.start() {
            tracing::error!(error = %e, "Session startup failed");
            self.shared.lifecycle.signal_startup(false);
        }

        let lifecycle = Arc::clone(&self.shared.lifecycle);
        let mut next_wake: Option<Duration> = None;

        loop {
            if lifecycle.wait_activity(next_wake, &cancel).is_err() {
                tracing::debug!("Session thread cancelled");
                break;
            }

            self.check_cleanup();
            lifecycle.clear_activity();

            if self.session_created {
                next_wake = Some(self.pump());
            }
        }

        self.finish();
    }

    fn start(&mut self) -> Result<()> {
        let ctx = ProviderContext {
            notifier: Notifier::new(Arc::clone(&self.shared.lifecycle)),
            audio: AudioDelivery::new(Arc::clone(&self.shared.pacer)),
        };

        crate::provider_call!("create_session");
        if let Err(e) = self.provider.create_session(ctx) {
            self.dialogs.fatal("Spotify session error", &e.to_string());
            return Err(e.into());
        }
        self.session_created = true;

        let bitrate = self.config.preferred_bitrate;
        crate::provider_call!("set_preferred_bitrate", kbps = bitrate.kbps());
        if let Err(e) = self.provider.set_preferred_bitrate(bitrate) {
            tracing::debug!(error = %e, "Error setting the preferred bitrate");
        }

        self.login()
    }

    /// Cached blob, then remembered user, then configured password, then
    /// ask the user.
    fn login(&mut self) -> Result<()> {
        let wanted = self.config.username.clone();
        let matches_config = |user: &str| wanted.is_empty() || wanted == user;

        if let Some(blob) = self.token.cached_credentials().filter(|b| matches_config(&b.username)) {
            tracing::info!(username = %blob.username, "Logging in with cached credentials");
            self.issue_login(LoginCredentials::Blob(blob), false);
            return Ok(());
        }

        if let Some(user) = self.provider.remembered_user().filter(|u| matches_config(u)) {
            tracing::info!(username = %user, "Logging in as remembered user");
            crate::provider_call!("relogin");
            match self.provider.relogin() {
                Ok(()) => {
                    self.login = LoginStatus::Pending;
                    self.shared.lifecycle.login_pending(false);
                    return Ok(());
                }
                Err(e) => tracing::warn!(error = %e, "Relogin failed"),
            }
        }

        if let Some((username, password)) = self.config.password_login() {
            tracing::info!(username = %username, "Logging in with configured password");
            self.issue_login(LoginCredentials::Password { username, password }, false);
            return Ok(());
        }

        tracing::info!("No stored identity, asking for credentials");
        self.shared.lifecycle.login_pending(true);
        match self.dialogs.prompt_credentials() {
            Some((username, password)) => {
                self.issue_login(LoginCredentials::Password { username, password }, true);
                Ok(())
            }
            None => Err(Error::StartupFailed),
        }
    }

    fn issue_login(&mut self, credentials: LoginCredentials, manual: bool) {
        crate::provider_call!("login", username = credentials.username());
        self.provider.login(credentials);
        self.login = LoginStatus::Pending;
        self.shared.lifecycle.login_pending(manual);
    }

    /// Pump until the provider asks for a non-zero delay
    fn pump(&mut self) -> Duration {
        let provider = Arc::clone(&self.provider);
        loop {
            let next = provider.process_events(&mut |event| self.dispatch(event));
            if !next.is_zero() {
                return next;
            }
        }
    }

    fn check_cleanup(&mut self) {
        let lifecycle = Arc::clone(&self.shared.lifecycle);
        let mut logout_issued = false;
        let ran = lifecycle.run_pending_cleanup(|| logout_issued = self.teardown());
        if ran && !logout_issued {
            // Nothing to log out of, no confirmation will come
            lifecycle.cleanup_done();
        }
    }

    /// Release the active item and log out. Returns whether a logout was
    /// issued.
    fn teardown(&mut self) -> bool {
        tracing::info!("Tearing down session");
        match self.active.take() {
            Some(ActiveItem::Track { uri, .. }) => {
                crate::provider_call!("release_track");
                self.provider.release_track(&uri);
                if self.player_loaded {
                    crate::provider_call!("player_unload");
                    self.provider.player_unload();
                    self.player_loaded = false;
                }
            }
            Some(ActiveItem::Album { uri }) => {
                self.shared.playlist.release(self.provider.as_ref());
                crate::provider_call!("release_album");
                self.provider.release_album(&uri);
            }
            None => {}
        }

        match self.login {
            LoginStatus::Pending | LoginStatus::LoggedIn => {
                crate::provider_call!("logout");
                self.provider.logout();
                true
            }
            LoginStatus::NotIssued | LoginStatus::Failed => false,
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        tracing::debug!(callback = event.name(), "< provider callback");
        match event {
            SessionEvent::LoggedIn(Ok(())) => {
                self.login = LoginStatus::LoggedIn;
                self.bind_item();
            }
            SessionEvent::LoggedIn(Err(e)) => {
                self.login = LoginStatus::Failed;
                tracing::error!(error = %e, "Login error");
                self.dialogs.fatal("Login Error", &e.to_string());
                crate::provider_call!("forget_me");
                self.provider.forget_me();
                self.shared.lifecycle.signal_startup(false);
            }
            SessionEvent::LoggedOut => {
                self.login = LoginStatus::NotIssued;
                self.shared.lifecycle.cleanup_done();
            }
            SessionEvent::MetadataUpdated => self.load_when_resolved(),
            SessionEvent::LookupFailed(e) => {
                tracing::error!(error = %e, uri = %self.uri, "Track lookup failed");
                if !self.shared.lifecycle.startup_state().is_done() {
                    self.dialogs.fatal("Spotify error", &e.to_string());
                    self.shared.lifecycle.signal_startup(false);
                }
            }
            SessionEvent::AlbumBrowseComplete(Ok(browse)) => {
                if let Err(extra) = self.shared.playlist.set_ready(browse) {
                    self.provider.release_browse(extra);
                }
                self.shared.lifecycle.signal_startup(true);
            }
            SessionEvent::AlbumBrowseComplete(Err(e)) => {
                tracing::error!(error = %e, uri = %self.uri, "Album browse failed");
                self.dialogs.fatal("Spotify album error", &e.to_string());
                self.shared.lifecycle.signal_startup(false);
            }
            SessionEvent::CredentialsUpdated(blob) => {
                tracing::debug!(username = %blob.username, "Credential blob updated");
                self.token.store_credentials(blob);
            }
            SessionEvent::EndOfTrack => self.shared.pacer.end_of_track(),
            SessionEvent::PlayTokenLost => {
                // Playback is left running; the host is only told.
                tracing::warn!("Play token lost");
                self.dialogs
                    .fatal("Playtoken lost!", "Someone else is using your Spotify account");
            }
            SessionEvent::StreamingError(e) => tracing::warn!(error = %e, "Streaming error"),
            SessionEvent::ConnectionError(e) => tracing::warn!(error = %e, "Connection error"),
            SessionEvent::LogMessage(msg) => tracing::debug!(message = %msg.trim_end(), "Provider log"),
            SessionEvent::MessageToUser(msg) => tracing::info!(message = %msg.trim_end(), "Message to user"),
        }
    }

    /// Logged in: resolve the track or start browsing the album
    fn bind_item(&mut self) {
        if self.active.is_some() || self.shared.lifecycle.cleanup_state() != CleanupState::NotStarted {
            return;
        }

        let result = match self.kind {
            ItemKind::Track => {
                crate::provider_call!("lookup_track", uri = %self.uri);
                self.provider.lookup_track(&self.uri).map(|()| ActiveItem::Track {
                    uri: self.uri.clone(),
                    duration: None,
                })
            }
            ItemKind::Album => {
                crate::provider_call!("browse_album", uri = %self.uri);
                self.provider
                    .browse_album(&self.uri)
                    .map(|()| ActiveItem::Album { uri: self.uri.clone() })
            }
            ItemKind::Unknown => return,
        };

        match result {
            Ok(item) => {
                self.active = Some(item);
                self.load_when_resolved();
            }
            Err(e) => {
                tracing::error!(error = %e, uri = %self.uri, "Could not bind item");
                self.dialogs.fatal("Spotify error", &e.to_string());
                self.shared.lifecycle.signal_startup(false);
            }
        }
    }

    /// Load and start the track once its metadata has arrived
    fn load_when_resolved(&mut self) {
        if self.player_loaded {
            return;
        }
        let Some(ActiveItem::Track { uri, duration }) = self.active.as_mut() else {
            return;
        };
        let Some(info) = self.provider.track_info(uri).filter(|info| info.name.is_some()) else {
            return;
        };

        crate::provider_call!("player_load", uri = %uri);
        if let Err(e) = self.provider.player_load(uri) {
            tracing::error!(error = %e, "Could not load track");
            self.dialogs.fatal("Spotify error", &e.to_string());
            self.shared.lifecycle.signal_startup(false);
            return;
        }
        crate::provider_call!("player_play", play = true);
        self.provider.player_play(true);

        *duration = info.duration;
        self.shared.pacer.set_duration(info.duration);
        self.player_loaded = true;

        if self.shared.lifecycle.signal_startup(true) {
            tracing::info!(track = ?info.name, "Playback started");
        }
    }

    /// Thread exit: release whatever graceful teardown did not
    fn finish(&mut self) {
        if let Some(item) = self.active.take() {
            tracing::warn!(?item, "Releasing item without graceful teardown");
            match item {
                ActiveItem::Track { uri, .. } => self.provider.release_track(&uri),
                ActiveItem::Album { uri } => {
                    self.shared.playlist.release(self.provider.as_ref());
                    self.provider.release_album(&uri);
                }
            }
        }
        if self.session_created {
            crate::provider_call!("release_session");
            self.provider.release_session();
            self.session_created = false;
        }
    }
}

/// Control-thread side of the session thread
pub struct DriverHandle {
    thread: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    cancel: CancelToken,
}

impl DriverHandle {
    /// Cancel the thread at its wait point and join it, giving up after
    /// `timeout`.
    pub fn shutdown(&mut self, lifecycle: &Lifecycle, timeout: Duration) {
        lifecycle.cancel(&self.cancel);
        let Some(thread) = self.thread.take() else {
            return;
        };
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    tracing::error!("Session thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Session thread did not stop in time, detaching");
            }
        }
    }
}
