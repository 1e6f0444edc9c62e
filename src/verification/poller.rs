//! Verification poller — watches the business's approval status after
//! submission until it reaches a terminal state.
//!
//! `start()` spawns one task that owns every timer. The returned
//! [`PollerHandle`] is the only way to reach it: `refresh_now()` runs an
//! out-of-band poll, `stop()` (or dropping the handle) tears it down. After
//! teardown no in-flight poll can publish state, fire the approval hook or
//! emit events.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::config::OnboardingConfig;
use crate::error::{AuthError, Error, NetworkError};
use crate::session::{AuthClient, SessionRecord, SessionStore, VerificationStatus};

const EVENT_CAPACITY: usize = 64;

/// Poller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollState {
    Idle,
    Polling,
    TerminalApproved,
    TerminalRejected,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalApproved | Self::TerminalRejected)
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::TerminalApproved => "terminal-approved",
            Self::TerminalRejected => "terminal-rejected",
        };
        write!(f, "{s}")
    }
}

/// One successful status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub status: String,
    pub raw: SessionRecord,
}

/// Notifications emitted by a running poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationEvent {
    StatusChanged {
        previous: Option<String>,
        status: String,
        state: PollState,
    },
    PollFailed {
        reason: String,
    },
    /// The session was rejected; polling stopped and re-authentication is
    /// required.
    AuthFailed {
        reason: String,
    },
    /// Fired once, the first time the status is terminal-approved.
    Approved {
        status: String,
    },
}

/// What a single observation did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub state: PollState,
    pub status_changed: bool,
    /// True only on the first terminal-approved observation.
    pub fire_transition: bool,
}

/// The pure state machine behind the poller.
///
/// Terminal states latch; the approval transition is reported at most once.
#[derive(Debug, Clone)]
pub struct PollTracker {
    state: PollState,
    last_status: Option<String>,
    transition_fired: bool,
}

impl Default for PollTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PollTracker {
    pub fn new() -> Self {
        Self {
            state: PollState::Idle,
            last_status: None,
            transition_fired: false,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// Enter `polling` from `idle`. No-op otherwise.
    pub fn begin(&mut self) {
        if self.state == PollState::Idle {
            self.state = PollState::Polling;
        }
    }

    /// Drop back to `idle` without an outcome. Terminal states are kept.
    pub fn halt(&mut self) {
        if !self.state.is_terminal() {
            self.state = PollState::Idle;
        }
    }

    pub fn observe(&mut self, status: &str) -> Observation {
        let status_changed = self.last_status.as_deref() != Some(status);
        self.last_status = Some(status.to_string());

        if !self.state.is_terminal() {
            self.state = match VerificationStatus::parse(status) {
                VerificationStatus::Approved => PollState::TerminalApproved,
                VerificationStatus::Rejected => PollState::TerminalRejected,
                _ => PollState::Polling,
            };
        }

        let fire_transition = self.state == PollState::TerminalApproved && !self.transition_fired;
        if fire_transition {
            self.transition_fired = true;
        }

        Observation {
            state: self.state,
            status_changed,
            fire_transition,
        }
    }
}

/// Hook run once when the poller reaches a terminal state.
pub type TerminalHook = Box<dyn FnOnce(&PollResult) + Send + 'static>;

/// Factory for polling tasks.
#[derive(Clone)]
pub struct VerificationPoller {
    auth: Arc<dyn AuthClient>,
    session: Arc<SessionStore>,
    initial_delay: Duration,
    interval: Duration,
}

impl VerificationPoller {
    pub fn new(
        auth: Arc<dyn AuthClient>,
        session: Arc<SessionStore>,
        initial_delay: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            auth,
            session,
            initial_delay,
            interval,
        }
    }

    pub fn from_config(
        config: &OnboardingConfig,
        auth: Arc<dyn AuthClient>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self::new(auth, session, config.poll_initial_delay, config.poll_interval)
    }

    /// Spawn the polling task. `on_approved` runs at most once.
    pub fn start(&self, on_approved: impl FnOnce(&PollResult) + Send + 'static) -> PollerHandle {
        self.start_with(on_approved, |_| {})
    }

    /// Like [`start`](Self::start), with a second one-time hook for
    /// terminal-rejected. It runs before the state is published.
    pub fn start_with(
        &self,
        on_approved: impl FnOnce(&PollResult) + Send + 'static,
        on_rejected: impl FnOnce(&PollResult) + Send + 'static,
    ) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let task = PollTask {
            auth: Arc::clone(&self.auth),
            session: Arc::clone(&self.session),
            initial_delay: self.initial_delay,
            interval: self.interval,
            tracker: PollTracker::new(),
            on_approved: Some(Box::new(on_approved)),
            on_rejected: Some(Box::new(on_rejected)),
            shutdown: shutdown_rx,
            refresh: refresh_rx,
            state_tx,
            events: events_tx.clone(),
        };

        info!(
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "Verification poller started"
        );

        PollerHandle {
            task: Some(tokio::spawn(task.run())),
            shutdown: shutdown_tx,
            refresh: refresh_tx,
            state: state_rx,
            events: events_tx,
        }
    }
}

/// Scoped ownership of a running poller.
pub struct PollerHandle {
    task: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    refresh: mpsc::Sender<()>,
    state: watch::Receiver<PollState>,
    events: broadcast::Sender<VerificationEvent>,
}

impl PollerHandle {
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VerificationEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<VerificationEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Request an immediate poll without touching the regular cadence.
    ///
    /// Returns `false` if the poller has already finished. Requests made
    /// while one is queued are coalesced.
    pub fn refresh_now(&self) -> bool {
        match self.refresh.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Tear down and wait until the task can no longer touch anything.
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!("Verification poller stopped");
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct PollTask {
    auth: Arc<dyn AuthClient>,
    session: Arc<SessionStore>,
    initial_delay: Duration,
    interval: Duration,
    tracker: PollTracker,
    on_approved: Option<TerminalHook>,
    on_rejected: Option<TerminalHook>,
    shutdown: watch::Receiver<bool>,
    refresh: mpsc::Receiver<()>,
    state_tx: watch::Sender<PollState>,
    events: broadcast::Sender<VerificationEvent>,
}

impl PollTask {
    async fn run(mut self) {
        self.tracker.begin();
        self.state_tx.send_replace(self.tracker.state());

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
                Some(()) = self.refresh.recv() => debug!("Out-of-band verification poll"),
            }

            if self.is_shut_down() {
                break;
            }
            if !self.poll_once().await || self.tracker.state().is_terminal() {
                break;
            }
        }

        debug!(state = %self.tracker.state(), "Verification poll loop exited");
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One fetch. Returns `false` when the loop must end.
    async fn poll_once(&mut self) -> bool {
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.changed() => return false,
            result = fetch(self.auth.as_ref(), &self.session) => result,
        };

        // Teardown may have raced the response.
        if self.is_shut_down() {
            return false;
        }

        match fetched {
            Ok(result) => {
                self.apply(result);
                true
            }
            Err(Error::Auth(e)) => {
                warn!(error = %e, "Session rejected while polling verification");
                self.auth.clear_session().await;
                self.tracker.halt();
                self.state_tx.send_replace(self.tracker.state());
                let _ = self.events.send(VerificationEvent::AuthFailed {
                    reason: e.to_string(),
                });
                false
            }
            Err(e) => {
                warn!(error = %e, "Verification poll failed");
                let _ = self.events.send(VerificationEvent::PollFailed {
                    reason: e.to_string(),
                });
                true
            }
        }
    }

    fn apply(&mut self, result: PollResult) {
        let previous = self.tracker.last_status().map(str::to_string);
        let observation = self.tracker.observe(&result.status);

        if observation.status_changed {
            info!(
                previous = previous.as_deref().unwrap_or("none"),
                status = %result.status,
                state = %observation.state,
                "Verification status changed"
            );
            let _ = self.events.send(VerificationEvent::StatusChanged {
                previous,
                status: result.status.clone(),
                state: observation.state,
            });
        } else {
            debug!(status = %result.status, "Verification status unchanged");
        }

        if observation.state == PollState::TerminalRejected
            && let Some(hook) = self.on_rejected.take()
        {
            info!(status = %result.status, "Business rejected");
            hook(&result);
        }

        self.state_tx.send_replace(observation.state);

        if observation.fire_transition {
            info!(status = %result.status, "Business approved, entering protected area");
            if let Some(hook) = self.on_approved.take() {
                hook(&result);
            }
            let _ = self.events.send(VerificationEvent::Approved {
                status: result.status.clone(),
            });
        }
    }
}

async fn fetch(auth: &dyn AuthClient, session: &SessionStore) -> Result<PollResult, Error> {
    let token = session.token().ok_or(AuthError::NoSession)?;
    let raw = auth.get_current_user(token.expose_secret()).await?;
    let status = raw
        .verification_status()
        .map(str::to_string)
        .ok_or_else(|| NetworkError::Decode {
            endpoint: "getCurrentUser".to_string(),
            reason: "session has no business verification status".to_string(),
        })?;
    Ok(PollResult { status, raw })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;
    use crate::session::{BusinessSession, SessionUser};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn record(status: &str) -> SessionRecord {
        SessionRecord {
            user: SessionUser {
                id: "u1".to_string(),
                email: "owner@acme.test".to_string(),
                name: None,
            },
            business: Some(BusinessSession {
                id: Some("b1".to_string()),
                verification_status: status.to_string(),
                tier: Some(4),
                plan: Some("business".to_string()),
            }),
        }
    }

    /// Returns scripted statuses in order, repeating the last one. `None`
    /// entries simulate a network failure.
    struct ScriptedAuth {
        script: Mutex<VecDeque<Option<&'static str>>>,
        last: Mutex<Option<&'static str>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedAuth {
        fn new(script: &[Option<&'static str>]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl AuthClient for ScriptedAuth {
        async fn get_current_user(&self, _token: &str) -> Result<SessionRecord, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = {
                let mut script = self.script.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                match script.pop_front() {
                    Some(entry) => {
                        *last = entry;
                        entry
                    }
                    None => *last,
                }
            };
            match next {
                Some(status) => Ok(record(status)),
                None => Err(NetworkError::Request {
                    endpoint: "/auth/me".to_string(),
                    reason: "connection reset".to_string(),
                }
                .into()),
            }
        }

        async fn refresh_session(&self) -> Result<(), AuthError> {
            Ok(())
        }

        async fn clear_session(&self) {}
    }

    fn session() -> Arc<SessionStore> {
        let session = Arc::new(SessionStore::new());
        session.sign_in(SecretString::from("tok".to_string()), None, Some(record("pending")));
        session
    }

    fn poller(auth: Arc<ScriptedAuth>, interval: Duration) -> VerificationPoller {
        VerificationPoller::new(auth, session(), Duration::from_millis(5), interval)
    }

    async fn wait_for_state(handle: &PollerHandle, target: PollState) {
        let mut rx = handle.watch_state();
        timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == target))
            .await
            .expect("timed out waiting for poll state")
            .expect("poller state channel closed");
    }

    #[test]
    fn tracker_fires_transition_once() {
        let mut tracker = PollTracker::new();
        tracker.begin();
        assert_eq!(tracker.state(), PollState::Polling);

        let first = tracker.observe("verified");
        assert!(first.fire_transition);
        assert_eq!(first.state, PollState::TerminalApproved);

        let second = tracker.observe("verified");
        assert!(!second.fire_transition);
        assert!(!second.status_changed);

        let alias = tracker.observe("ACTIVE");
        assert!(!alias.fire_transition);
        assert!(alias.status_changed);
        assert_eq!(alias.state, PollState::TerminalApproved);
    }

    #[test]
    fn tracker_stays_polling_on_non_terminal() {
        let mut tracker = PollTracker::new();
        tracker.begin();
        for status in ["unverified", "pending", "in_review", "pending"] {
            let obs = tracker.observe(status);
            assert_eq!(obs.state, PollState::Polling, "{status}");
            assert!(!obs.fire_transition);
        }
    }

    #[test]
    fn tracker_latches_rejection() {
        let mut tracker = PollTracker::new();
        tracker.begin();
        assert_eq!(tracker.observe("REJECTED").state, PollState::TerminalRejected);
        let later = tracker.observe("approved");
        assert_eq!(later.state, PollState::TerminalRejected);
        assert!(!later.fire_transition);
    }

    #[tokio::test]
    async fn pending_pending_verified_fires_once_after_third_poll() {
        let auth = Arc::new(ScriptedAuth::new(&[
            Some("pending"),
            Some("pending"),
            Some("verified"),
        ]));
        let fired = Arc::new(AtomicUsize::new(0));
        let calls_at_fire = Arc::new(AtomicUsize::new(0));

        let handle = {
            let fired = Arc::clone(&fired);
            let calls_at_fire = Arc::clone(&calls_at_fire);
            let auth_for_hook = Arc::clone(&auth);
            poller(Arc::clone(&auth), Duration::from_millis(10)).start(move |result| {
                assert_eq!(result.status, "verified");
                fired.fetch_add(1, Ordering::SeqCst);
                calls_at_fire.store(auth_for_hook.calls.load(Ordering::SeqCst), Ordering::SeqCst);
            })
        };

        wait_for_state(&handle, PollState::TerminalApproved).await;
        // Give any stray tick a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(calls_at_fire.load(Ordering::SeqCst), 3);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 3);
        assert!(handle.is_finished());
        assert!(!handle.refresh_now());
    }

    #[tokio::test]
    async fn emits_status_changes_and_approval() {
        let auth = Arc::new(ScriptedAuth::new(&[Some("pending"), Some("approved")]));
        let handle = poller(auth, Duration::from_millis(10)).start(|_| {});
        let mut events = handle.subscribe();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let event = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
            seen.push(event);
        }

        assert_eq!(
            seen[0],
            VerificationEvent::StatusChanged {
                previous: None,
                status: "pending".to_string(),
                state: PollState::Polling,
            }
        );
        assert_eq!(
            seen[1],
            VerificationEvent::StatusChanged {
                previous: Some("pending".to_string()),
                status: "approved".to_string(),
                state: PollState::TerminalApproved,
            }
        );
        assert_eq!(
            seen[2],
            VerificationEvent::Approved {
                status: "approved".to_string()
            }
        );
    }

    #[tokio::test]
    async fn event_stream_reports_rejection() {
        use futures_util::StreamExt;

        let auth = Arc::new(ScriptedAuth::new(&[Some("rejected")]));
        let handle = poller(auth, Duration::from_millis(10)).start(|_| {});
        let mut stream = handle.event_stream();

        let event = timeout(TEST_TIMEOUT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            VerificationEvent::StatusChanged {
                previous: None,
                status: "rejected".to_string(),
                state: PollState::TerminalRejected,
            }
        );
        wait_for_state(&handle, PollState::TerminalRejected).await;
    }

    #[tokio::test]
    async fn failures_are_reported_without_state_change() {
        let auth = Arc::new(ScriptedAuth::new(&[None, Some("pending"), None, Some("rejected")]));
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let fired = Arc::clone(&fired);
            poller(Arc::clone(&auth), Duration::from_millis(10)).start(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut events = handle.subscribe();

        let first = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(first, VerificationEvent::PollFailed { .. }));
        assert_eq!(handle.state(), PollState::Polling);

        wait_for_state(&handle, PollState::TerminalRejected).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_now_polls_out_of_band() {
        let auth = Arc::new(ScriptedAuth::new(&[Some("pending"), Some("verified")]));
        // Interval far longer than the test.
        let handle = VerificationPoller::new(
            Arc::clone(&auth) as Arc<dyn AuthClient>,
            session(),
            Duration::from_millis(5),
            Duration::from_secs(3600),
        )
        .start(|_| {});

        let mut rx = handle.watch_state();
        timeout(TEST_TIMEOUT, async {
            while auth.calls.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*rx.borrow_and_update(), PollState::Polling);

        assert!(handle.refresh_now());
        wait_for_state(&handle, PollState::TerminalApproved).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_discards_in_flight_poll() {
        let gate = Arc::new(Notify::new());
        let mut scripted = ScriptedAuth::new(&[Some("verified")]);
        scripted.gate = Some(Arc::clone(&gate));
        let auth = Arc::new(scripted);
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = {
            let fired = Arc::clone(&fired);
            poller(Arc::clone(&auth), Duration::from_millis(10)).start(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let state = handle.watch_state();
        let mut events = handle.subscribe();

        // Wait until the first poll is blocked inside the collaborator.
        timeout(TEST_TIMEOUT, async {
            while auth.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        handle.stop().await;
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(*state.borrow(), PollState::Polling);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Closed) | Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn dropping_handle_releases_task() {
        let auth = Arc::new(ScriptedAuth::new(&[Some("pending")]));
        let handle = poller(Arc::clone(&auth), Duration::from_millis(5)).start(|_| {});
        let state = handle.watch_state();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = auth.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), calls);
        // Sender side lives in the aborted task.
        assert!(state.has_changed().is_err());
    }

    /// Rejects every token.
    #[derive(Default)]
    struct ExpiredAuth {
        calls: AtomicUsize,
        cleared: AtomicUsize,
    }

    #[async_trait]
    impl AuthClient for ExpiredAuth {
        async fn get_current_user(&self, _token: &str) -> Result<SessionRecord, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Unauthorized.into())
        }

        async fn refresh_session(&self) -> Result<(), AuthError> {
            Err(AuthError::Unauthorized)
        }

        async fn clear_session(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn auth_failure_stops_polling_and_clears_session() {
        let auth = Arc::new(ExpiredAuth::default());
        let handle = VerificationPoller::new(
            Arc::clone(&auth) as Arc<dyn AuthClient>,
            session(),
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .start(|_| panic!("approval must not fire"));
        let mut events = handle.subscribe();

        let event = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, VerificationEvent::AuthFailed { .. }));

        timeout(TEST_TIMEOUT, async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poll loop kept running after auth failure");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), PollState::Idle);
        assert!(!handle.refresh_now());
    }

    #[tokio::test]
    async fn rejection_hook_runs_once_before_state_is_published() {
        let auth = Arc::new(ScriptedAuth::new(&[Some("pending"), Some("REJECTED")]));
        let rejected = Arc::new(AtomicUsize::new(0));
        let handle = {
            let rejected = Arc::clone(&rejected);
            poller(Arc::clone(&auth), Duration::from_millis(5)).start_with(
                |_| panic!("approval must not fire"),
                move |result| {
                    assert_eq!(result.status, "REJECTED");
                    rejected.fetch_add(1, Ordering::SeqCst);
                },
            )
        };

        wait_for_state(&handle, PollState::TerminalRejected).await;
        assert_eq!(rejected.load(Ordering::SeqCst), 1);

        // Loop exited; a late refresh cannot fire it again.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.refresh_now());
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }
}
