//! Session validity monitor
//!
//! Re-derives whether the stored token is usable and emits a redirect to the
//! login entry point when it is not. Four triggers feed the same check:
//!
//! - a fixed poll (1s by default), catching mutations that bypass the
//!   storage write path
//! - `Local` storage events, for writes made through this process
//! - focus events injected by the host when its view regains the foreground
//! - `External` storage events, for writes made by another process
//!
//! The check is serialized and idempotent: any number of triggers in quick
//! succession delete the stale token once and redirect once.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::storage::{StorageOrigin, TOKEN_KEY, TokenStorage, USER_KEY};
use crate::token::{self, TokenStatus};

/// What caused a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Poll interval elapsed
    Tick,
    /// Slot written through this process
    StorageWrite,
    /// Host view regained focus
    Focus,
    /// Slot written by another process
    ExternalStorage,
}

/// Receives redirect intents
pub trait Navigator: Send + Sync {
    fn redirect(&self, target: &str);
}

/// Navigator that only logs the intent
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect(&self, target: &str) {
        info!("Session no longer valid, redirecting to {}", target);
    }
}

/// Wall-clock source
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Poll period
    pub poll_interval: Duration,
    /// Redirect target when the session is gone
    pub login_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            login_path: "/login".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct CheckState {
    /// A redirect was emitted and no valid token has been seen since
    redirected: bool,
}

/// Derives the session validity signal from the storage slot
pub struct ValidityMonitor {
    storage: Arc<dyn TokenStorage>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    state: Mutex<CheckState>,
    valid_tx: watch::Sender<bool>,
}

impl ValidityMonitor {
    pub fn new(
        storage: Arc<dyn TokenStorage>,
        navigator: Arc<dyn Navigator>,
        config: MonitorConfig,
    ) -> Self {
        let (valid_tx, _) = watch::channel(false);
        Self {
            storage,
            navigator,
            clock: Arc::new(SystemClock),
            config,
            state: Mutex::new(CheckState::default()),
            valid_tx,
        }
    }

    /// Replace the wall-clock source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to the derived validity flag
    pub fn validity(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }

    /// Validity as of the last check
    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    /// Re-derive validity and apply its side effects.
    ///
    /// - `Valid`: nothing happens.
    /// - `ExpiredOrMalformed`: `token` and `user` are deleted, then a redirect
    ///   is emitted unless one already was.
    /// - `NoToken`: nothing is deleted; a redirect is emitted unless one
    ///   already was.
    ///
    /// Storage failures are logged and treated as an absent token.
    pub fn check(&self, trigger: Trigger) -> TokenStatus {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let token = self.storage.get(TOKEN_KEY).unwrap_or_else(|e| {
            warn!("Failed to read token from storage: {}", e);
            None
        });
        let status = token::status_at(token.as_deref(), self.clock.now_ms());
        debug!("Session check ({:?}): {:?}", trigger, status);

        match status {
            TokenStatus::Valid => state.redirected = false,
            TokenStatus::ExpiredOrMalformed => {
                self.clear_session();
                self.redirect_once(&mut state);
            }
            TokenStatus::NoToken => self.redirect_once(&mut state),
        }

        self.valid_tx.send_replace(status.is_valid());
        status
    }

    fn clear_session(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Failed to remove '{}' from storage: {}", key, e);
            }
        }
        info!("Token expired or invalid, removed from storage");
    }

    fn redirect_once(&self, state: &mut CheckState) {
        if !state.redirected {
            state.redirected = true;
            self.navigator.redirect(&self.config.login_path);
        }
    }

    /// Start the poll timer and event listeners on the current tokio runtime.
    ///
    /// The returned handle owns them; dropping it stops the monitor.
    pub fn spawn(self) -> MonitorHandle {
        let monitor = Arc::new(self);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<Trigger>(16);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let mut storage_rx = monitor.storage.subscribe();
        let task_monitor = monitor.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task_monitor.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut storage_open = true;

            debug!(
                "Session monitor started (poll: {:?})",
                task_monitor.config.poll_interval
            );

            loop {
                let trigger = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => Trigger::Tick,
                    event = storage_rx.recv(), if storage_open => match event {
                        Ok(event) => match event.origin {
                            StorageOrigin::Local => Trigger::StorageWrite,
                            StorageOrigin::External => Trigger::ExternalStorage,
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Session monitor skipped {} storage events", skipped);
                            Trigger::StorageWrite
                        }
                        Err(RecvError::Closed) => {
                            storage_open = false;
                            continue;
                        }
                    },
                    Some(trigger) = trigger_rx.recv() => trigger,
                };

                // Storage reads and deletes may touch the filesystem
                let checker = task_monitor.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || checker.check(trigger)).await {
                    warn!("Session check failed: {}", e);
                }
            }

            debug!("Session monitor stopped");
        });

        MonitorHandle {
            monitor,
            trigger_tx,
            shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running monitor
///
/// Dropping the handle aborts the background task, releasing the timer and
/// the storage subscription.
pub struct MonitorHandle {
    monitor: Arc<ValidityMonitor>,
    trigger_tx: mpsc::Sender<Trigger>,
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Request a check. If checks are already queued this one is redundant
    /// and dropped.
    pub fn trigger(&self, trigger: Trigger) {
        if self.trigger_tx.try_send(trigger).is_err() {
            debug!("Session check already pending, dropping {:?}", trigger);
        }
    }

    /// The host view regained focus
    pub fn focus(&self) {
        self.trigger(Trigger::Focus);
    }

    pub fn validity(&self) -> watch::Receiver<bool> {
        self.monitor.validity()
    }

    pub fn is_valid(&self) -> bool {
        self.monitor.is_valid()
    }

    /// Stop the monitor and wait for its task to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError, StorageEvent};
    use crate::token::encode_unsigned;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    const START_MS: i64 = 1_700_000_000_000;

    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn new(ms: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(ms)))
        }

        fn advance(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingNavigator(Mutex<Vec<String>>);

    impl RecordingNavigator {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl Navigator for RecordingNavigator {
        fn redirect(&self, target: &str) {
            self.0.lock().unwrap().push(target.to_string());
        }
    }

    /// Counts remove calls and the removals that deleted something
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        remove_calls: AtomicUsize,
        token_deletions: AtomicUsize,
    }

    impl TokenStorage for CountingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<bool, StorageError> {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
            let existed = self.inner.remove(key)?;
            if existed && key == TOKEN_KEY {
                self.token_deletions.fetch_add(1, Ordering::SeqCst);
            }
            Ok(existed)
        }

        fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
            self.inner.subscribe()
        }
    }

    struct Fixture {
        storage: Arc<CountingStorage>,
        navigator: Arc<RecordingNavigator>,
        clock: Arc<ManualClock>,
        monitor: ValidityMonitor,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(CountingStorage::default());
        let navigator = Arc::new(RecordingNavigator::default());
        let clock = ManualClock::new(START_MS);
        let monitor = ValidityMonitor::new(
            storage.clone(),
            navigator.clone(),
            MonitorConfig::default(),
        )
        .with_clock(clock.clone());

        Fixture {
            storage,
            navigator,
            clock,
            monitor,
        }
    }

    fn token_expiring_in(secs: i64) -> String {
        encode_unsigned(&json!({"sub": "1", "exp": START_MS / 1000 + secs}))
    }

    #[test]
    fn test_valid_token_has_no_side_effects() {
        let f = fixture();
        f.storage.set(TOKEN_KEY, &token_expiring_in(3600)).unwrap();
        f.storage.set(USER_KEY, "{}").unwrap();

        assert_eq!(f.monitor.check(Trigger::StorageWrite), TokenStatus::Valid);
        assert_eq!(f.monitor.check(Trigger::Tick), TokenStatus::Valid);

        assert_eq!(f.navigator.count(), 0);
        assert_eq!(f.storage.remove_calls.load(Ordering::SeqCst), 0);
        assert!(f.monitor.is_valid());
    }

    #[test]
    fn test_absent_token_redirects_without_deleting() {
        let f = fixture();
        assert_eq!(f.monitor.check(Trigger::Tick), TokenStatus::NoToken);
        assert_eq!(f.monitor.check(Trigger::Focus), TokenStatus::NoToken);

        assert_eq!(f.storage.remove_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.navigator.count(), 1);
        assert_eq!(f.navigator.0.lock().unwrap()[0], "/login");
        assert!(!f.monitor.is_valid());
    }

    #[test]
    fn test_expiry_crossing_deletes_and_redirects_once() {
        let f = fixture();
        f.storage.set(TOKEN_KEY, &token_expiring_in(60)).unwrap();
        f.storage.set(USER_KEY, r#"{"login":"student"}"#).unwrap();
        assert_eq!(f.monitor.check(Trigger::Tick), TokenStatus::Valid);

        f.clock.advance(61_000);

        // Poll, focus and storage events all land in the same tick
        assert_eq!(
            f.monitor.check(Trigger::Tick),
            TokenStatus::ExpiredOrMalformed
        );
        assert_eq!(f.monitor.check(Trigger::Focus), TokenStatus::NoToken);
        assert_eq!(f.monitor.check(Trigger::StorageWrite), TokenStatus::NoToken);
        assert_eq!(
            f.monitor.check(Trigger::ExternalStorage),
            TokenStatus::NoToken
        );

        assert_eq!(f.storage.token_deletions.load(Ordering::SeqCst), 1);
        assert_eq!(f.navigator.count(), 1);
        assert_eq!(f.storage.get(USER_KEY).unwrap(), None);
        assert!(!f.monitor.is_valid());
    }

    #[test]
    fn test_malformed_token_is_cleared() {
        let f = fixture();
        f.storage.set(TOKEN_KEY, "not-a-jwt").unwrap();
        f.storage.set(USER_KEY, "{}").unwrap();

        assert_eq!(
            f.monitor.check(Trigger::StorageWrite),
            TokenStatus::ExpiredOrMalformed
        );
        assert_eq!(f.storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(f.storage.get(USER_KEY).unwrap(), None);
        assert_eq!(f.navigator.count(), 1);
    }

    #[test]
    fn test_new_login_rearms_redirect() {
        let f = fixture();
        assert_eq!(f.monitor.check(Trigger::Tick), TokenStatus::NoToken);
        assert_eq!(f.navigator.count(), 1);

        f.storage.set(TOKEN_KEY, &token_expiring_in(10)).unwrap();
        assert_eq!(f.monitor.check(Trigger::StorageWrite), TokenStatus::Valid);

        f.clock.advance(10_000);
        assert_eq!(
            f.monitor.check(Trigger::Tick),
            TokenStatus::ExpiredOrMalformed
        );
        assert_eq!(f.navigator.count(), 2);
    }

    #[test]
    fn test_validity_channel_follows_checks() {
        let f = fixture();
        let rx = f.monitor.validity();
        assert!(!*rx.borrow());

        f.storage.set(TOKEN_KEY, &token_expiring_in(5)).unwrap();
        f.monitor.check(Trigger::StorageWrite);
        assert!(*rx.borrow());

        f.clock.advance(5_000);
        f.monitor.check(Trigger::Tick);
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_concurrent_checks_delete_and_redirect_once() {
        let f = fixture();
        f.storage.set(TOKEN_KEY, &token_expiring_in(-1)).unwrap();

        std::thread::scope(|scope| {
            for trigger in [
                Trigger::Tick,
                Trigger::Focus,
                Trigger::StorageWrite,
                Trigger::ExternalStorage,
            ]
            .into_iter()
            .cycle()
            .take(16)
            {
                let monitor = &f.monitor;
                scope.spawn(move || monitor.check(trigger));
            }
        });

        assert_eq!(f.storage.token_deletions.load(Ordering::SeqCst), 1);
        assert_eq!(f.navigator.count(), 1);
    }
}
