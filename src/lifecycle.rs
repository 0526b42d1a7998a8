//! Startup and cleanup barriers shared by the control thread and the
//! session thread.
//!
//! Three pieces of state, each behind its own lock:
//!
//! - the startup state and the activity flag (main lock), with one condvar
//!   for the startup rendezvous and one that wakes the event loop
//! - the cleanup state (cleanup lock) with its own condvar
//!
//! No method holds one of these locks while acquiring the other.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline for both the startup and the cleanup rendezvous
pub const START_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupState {
    NotStarted,
    /// `manual` is set while the user is typing credentials
    LoginPending { manual: bool },
    Failed,
    Succeeded,
}

impl StartupState {
    pub fn is_done(self) -> bool {
        matches!(self, StartupState::Failed | StartupState::Succeeded)
    }
}

/// Only ever advances in declaration order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CleanupState {
    NotStarted,
    Pending,
    InProgress,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Returned when the session thread was cancelled at its wait point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

/// Cooperative cancellation flag, checked at the event-loop wait
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

struct MainState {
    startup: StartupState,
    notification: bool,
}

pub struct Lifecycle {
    main: Mutex<MainState>,
    startup_cv: Condvar,
    activity_cv: Condvar,
    cleanup: Mutex<CleanupState>,
    cleanup_cv: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            main: Mutex::new(MainState {
                startup: StartupState::NotStarted,
                notification: false,
            }),
            startup_cv: Condvar::new(),
            activity_cv: Condvar::new(),
            cleanup: Mutex::new(CleanupState::NotStarted),
            cleanup_cv: Condvar::new(),
        }
    }

    // ========================================================================
    // Startup barrier
    // ========================================================================

    pub fn startup_state(&self) -> StartupState {
        self.main.lock().startup
    }

    /// Login has been issued; `manual` marks interactive credential entry.
    pub fn login_pending(&self, manual: bool) {
        let mut main = self.main.lock();
        if !main.startup.is_done() {
            main.startup = StartupState::LoginPending { manual };
        }
    }

    /// Record the startup result and wake the waiting control thread.
    ///
    /// Only the first call has an effect; returns whether it was this one.
    pub fn signal_startup(&self, success: bool) -> bool {
        let mut main = self.main.lock();
        if main.startup.is_done() {
            return false;
        }
        main.startup = if success {
            StartupState::Succeeded
        } else {
            StartupState::Failed
        };
        tracing::debug!(success, "Startup signalled");
        self.startup_cv.notify_all();
        true
    }

    /// Block until startup is signalled or `timeout` passes.
    ///
    /// The deadline does not apply once a manual login has started: the
    /// manual flag stays set until startup is signalled, so a login issued
    /// from typed credentials is waited on without bound.
    pub fn wait_startup(&self, timeout: Duration) -> StartupOutcome {
        let deadline = Instant::now() + timeout;
        let mut main = self.main.lock();
        loop {
            match main.startup {
                StartupState::Succeeded => return StartupOutcome::Succeeded,
                StartupState::Failed => return StartupOutcome::Failed,
                StartupState::LoginPending { manual: true } => {
                    self.startup_cv.wait_for(&mut main, timeout);
                }
                _ => {
                    if Instant::now() >= deadline {
                        return StartupOutcome::TimedOut;
                    }
                    self.startup_cv.wait_until(&mut main, deadline);
                }
            }
        }
    }

    // ========================================================================
    // Event-loop activity
    // ========================================================================

    /// Set the activity flag and wake the event loop. Safe from any thread.
    pub fn notify(&self) {
        let mut main = self.main.lock();
        main.notification = true;
        self.activity_cv.notify_one();
    }

    /// Event-loop wait point; the only place the session thread can be
    /// cancelled.
    ///
    /// With `timeout == None` this blocks until notified, otherwise it
    /// waits at most `timeout` unless the flag is already set.
    pub fn wait_activity(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        let mut main = self.main.lock();
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        match timeout {
            None => {
                while !main.notification {
                    self.activity_cv.wait(&mut main);
                    if cancel.is_cancelled() {
                        return Err(Cancelled);
                    }
                }
            }
            Some(timeout) => {
                if !main.notification {
                    tracing::trace!(timeout_ms = timeout.as_millis() as u64, "Waiting for timed activity");
                    self.activity_cv.wait_for(&mut main, timeout);
                    if cancel.is_cancelled() {
                        return Err(Cancelled);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn clear_activity(&self) {
        self.main.lock().notification = false;
    }

    /// Cancel the session thread and wake it if it is parked.
    pub fn cancel(&self, cancel: &CancelToken) {
        let _main = self.main.lock();
        cancel.set();
        self.activity_cv.notify_all();
    }

    // ========================================================================
    // Cleanup barrier
    // ========================================================================

    pub fn cleanup_state(&self) -> CleanupState {
        *self.cleanup.lock()
    }

    /// Ask the session thread to tear down and wait for the logout to be
    /// confirmed. Returns whether it was confirmed before the deadline.
    pub fn request_cleanup(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut cleanup = self.cleanup.lock();
            if *cleanup == CleanupState::Done {
                return true;
            }
            if *cleanup == CleanupState::NotStarted {
                *cleanup = CleanupState::Pending;
            }
        }

        // The loop may not have any session work queued yet, wake it anyway.
        self.notify();

        let mut cleanup = self.cleanup.lock();
        while *cleanup != CleanupState::Done {
            if self.cleanup_cv.wait_until(&mut cleanup, deadline).timed_out() {
                break;
            }
        }
        *cleanup == CleanupState::Done
    }

    /// Run `teardown` if cleanup is pending, then move to `InProgress`.
    ///
    /// Returns whether teardown ran.
    pub fn run_pending_cleanup(&self, teardown: impl FnOnce()) -> bool {
        let mut cleanup = self.cleanup.lock();
        if *cleanup != CleanupState::Pending {
            return false;
        }
        teardown();
        *cleanup = CleanupState::InProgress;
        true
    }

    /// Logout confirmed: mark cleanup done and wake the waiter.
    pub fn cleanup_done(&self) {
        let mut cleanup = self.cleanup.lock();
        *cleanup = CleanupState::Done;
        self.cleanup_cv.notify_all();
    }
}
