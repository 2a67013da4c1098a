//! Edit lock coordination
//!
//! State machine:
//!
//! ```text
//! UNLOCKED → ACQUIRING → HELD ⇄ RENEWING
//!               ↓          ↓        ↓
//!            UNLOCKED   RELEASED / LOST → ACQUIRING
//! ```
//!
//! Every state change goes through [`validate_transition`]. A transition that
//! is no longer legal when it is attempted (for example a heartbeat finishing
//! after the lock was released) is dropped, so concurrent release and renewal
//! cannot resurrect a released lock.

use crate::api::{LockGrant, LockHolder, LockResponse, LockService, RenewOutcome};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tm_model::{HolderId, ModelId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Lock lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    /// Not held, no request pending
    Unlocked,
    /// Acquire request in flight
    Acquiring,
    /// Held by this session
    Held,
    /// Heartbeat in flight
    Renewing,
    /// Given up by this session
    Released,
    /// Taken away by a failed or stolen heartbeat
    Lost,
}

impl LockState {
    /// Whether this session may edit
    #[inline]
    #[must_use]
    pub fn is_held(self) -> bool {
        matches!(self, Self::Held | Self::Renewing)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unlocked => "UNLOCKED",
            Self::Acquiring => "ACQUIRING",
            Self::Held => "HELD",
            Self::Renewing => "RENEWING",
            Self::Released => "RELEASED",
            Self::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// Illegal lock state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal lock transition {from} -> {to}")]
pub struct LockTransitionError {
    /// Current state
    pub from: LockState,
    /// Requested state
    pub to: LockState,
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: LockState) -> &'static [LockState] {
    use LockState::{Acquiring, Held, Lost, Released, Renewing, Unlocked};
    match from {
        Unlocked | Released | Lost => &[Acquiring],
        Acquiring => &[Held, Unlocked],
        Held => &[Renewing, Released, Lost],
        Renewing => &[Held, Released, Lost],
    }
}

/// Check a state change against the transition table
///
/// # Errors
/// [`LockTransitionError`] if `to` is not reachable from `from`.
pub fn validate_transition(from: LockState, to: LockState) -> Result<(), LockTransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(LockTransitionError { from, to })
    }
}

/// Consecutive heartbeat failure counter
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTracker {
    max_failures: u32,
    consecutive: u32,
}

impl HeartbeatTracker {
    /// Tracker that gives up after `max_failures` failures in a row
    #[inline]
    #[must_use]
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            consecutive: 0,
        }
    }

    /// A renewal succeeded
    #[inline]
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// A renewal failed; returns `true` once the limit is reached
    #[inline]
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.max_failures
    }

    /// Failures since the last success
    #[inline]
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}

/// Observable lock status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Current state
    pub state: LockState,
    /// Latest grant while held
    pub grant: Option<LockGrant>,
    /// Session that holds or took the lock, when known
    pub conflict: Option<LockHolder>,
    /// Heartbeat failures since the last success
    pub heartbeat_failures: u32,
}

impl LockSnapshot {
    fn unlocked() -> Self {
        Self {
            state: LockState::Unlocked,
            grant: None,
            conflict: None,
            heartbeat_failures: 0,
        }
    }
}

/// Returns an unfinished acquisition to UNLOCKED when dropped
struct AcquireAttempt<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl AcquireAttempt<'_> {
    fn settled(mut self) {
        self.armed = false;
    }
}

impl Drop for AcquireAttempt<'_> {
    fn drop(&mut self) {
        if self.armed && self.inner.transition(LockState::Unlocked, |_| {}).is_ok() {
            tracing::debug!(model = %self.inner.model, "lock acquisition abandoned");
        }
    }
}

struct Inner {
    service: Arc<dyn LockService>,
    model: ModelId,
    holder: HolderId,
    heartbeat_interval: Duration,
    max_heartbeat_failures: u32,
    state: watch::Sender<LockSnapshot>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn transition(
        &self,
        to: LockState,
        update: impl FnOnce(&mut LockSnapshot),
    ) -> Result<LockState, LockTransitionError> {
        let mut result = Err(LockTransitionError { from: to, to });
        self.state.send_if_modified(|snapshot| {
            let from = snapshot.state;
            match validate_transition(from, to) {
                Ok(()) => {
                    snapshot.state = to;
                    update(snapshot);
                    result = Ok(from);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        if let Ok(from) = result {
            tracing::debug!(model = %self.model, %from, %to, "lock state changed");
        }
        result
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
    }

    /// Leave ACQUIRING on early exit, including a dropped future
    fn begin_acquire(&self) -> AcquireAttempt<'_> {
        AcquireAttempt {
            inner: self,
            armed: true,
        }
    }

    /// Synchronous half of a release; returns whether the lock was held
    fn mark_released(&self) -> bool {
        self.stop_heartbeat();
        self.transition(LockState::Released, |s| {
            s.grant = None;
            s.heartbeat_failures = 0;
        })
        .is_ok()
    }

    async fn send_release(&self) -> SyncResult<()> {
        match self.service.release(&self.model, &self.holder).await {
            Ok(()) => {
                tracing::info!(model = %self.model, holder = %self.holder, "lock released");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "lock release failed");
                Err(e.into())
            }
        }
    }
}

async fn heartbeat_loop(inner: Arc<Inner>) {
    let period = inner.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = HeartbeatTracker::new(inner.max_heartbeat_failures);

    loop {
        ticker.tick().await;
        if inner.transition(LockState::Renewing, |_| {}).is_err() {
            break;
        }

        match inner.service.renew(&inner.model, &inner.holder).await {
            Ok(RenewOutcome::Renewed(grant)) => {
                tracker.record_success();
                tracing::debug!(model = %inner.model, "lock renewed");
                let renewed = inner.transition(LockState::Held, |s| {
                    s.grant = Some(grant);
                    s.heartbeat_failures = 0;
                });
                if renewed.is_err() {
                    break;
                }
            }
            Ok(RenewOutcome::Stolen(other)) => {
                tracing::warn!(
                    model = %inner.model,
                    holder = %other.holder,
                    "lock taken by another session"
                );
                let _ = inner.transition(LockState::Lost, |s| {
                    s.grant = None;
                    s.conflict = Some(other);
                });
                break;
            }
            Err(e) => {
                let exhausted = tracker.record_failure();
                let failures = tracker.consecutive_failures();
                tracing::warn!(model = %inner.model, error = %e, failures, "lock heartbeat failed");
                let next = if exhausted {
                    LockState::Lost
                } else {
                    LockState::Held
                };
                let moved = inner.transition(next, |s| {
                    s.heartbeat_failures = failures;
                    if exhausted {
                        s.grant = None;
                    }
                });
                if exhausted || moved.is_err() {
                    if exhausted {
                        tracing::warn!(model = %inner.model, "lock lost after repeated heartbeat failures");
                    }
                    break;
                }
            }
        }
    }
}

/// Acquires, renews and releases one model's edit lock
#[derive(Clone)]
pub struct LockCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("model", &self.inner.model)
            .field("holder", &self.inner.holder)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LockCoordinator {
    /// Coordinator for `model` acting as `holder`
    pub fn new(
        service: Arc<dyn LockService>,
        model: ModelId,
        holder: HolderId,
        config: &SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(LockSnapshot::unlocked());
        Self {
            inner: Arc::new(Inner {
                service,
                model,
                holder,
                heartbeat_interval: config.heartbeat_interval(),
                max_heartbeat_failures: config.max_heartbeat_failures,
                state,
                heartbeat: Mutex::new(None),
            }),
        }
    }

    /// Model this lock guards
    #[inline]
    #[must_use]
    pub fn model(&self) -> &ModelId {
        &self.inner.model
    }

    /// Local session id
    #[inline]
    #[must_use]
    pub fn holder(&self) -> &HolderId {
        &self.inner.holder
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> LockState {
        self.inner.state.borrow().state
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> LockSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Whether edits must be blocked
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.state().is_held()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockSnapshot> {
        self.inner.state.subscribe()
    }

    /// Acquire the lock and start the heartbeat
    ///
    /// # Errors
    /// - [`SyncError::LockConflict`] if another session holds it; the
    ///   coordinator returns to UNLOCKED
    /// - [`SyncError::Network`] if the request fails
    /// - [`SyncError::LockState`] if an acquisition is already active
    ///
    /// Dropping the future before it completes returns the coordinator to
    /// UNLOCKED.
    pub async fn acquire(&self) -> SyncResult<LockGuard> {
        let inner = &self.inner;
        inner.transition(LockState::Acquiring, |s| {
            s.conflict = None;
            s.heartbeat_failures = 0;
        })?;
        let attempt = inner.begin_acquire();
        tracing::debug!(model = %inner.model, holder = %inner.holder, "acquiring lock");

        match inner.service.acquire(&inner.model, &inner.holder).await {
            Ok(LockResponse::Granted(grant)) => {
                inner.transition(LockState::Held, |s| s.grant = Some(grant))?;
                attempt.settled();
                let task = tokio::spawn(heartbeat_loop(Arc::clone(inner)));
                if let Some(previous) = inner.heartbeat.lock().replace(task) {
                    previous.abort();
                }
                tracing::info!(model = %inner.model, holder = %inner.holder, "lock acquired");
                Ok(LockGuard {
                    coordinator: self.clone(),
                    armed: true,
                })
            }
            Ok(LockResponse::Held(other)) => {
                tracing::info!(
                    model = %inner.model,
                    holder = %other.holder,
                    "lock held elsewhere, session is read-only"
                );
                let err = SyncError::LockConflict {
                    holder: other.holder.clone(),
                    acquired_at: other.acquired_at,
                };
                inner.transition(LockState::Unlocked, |s| s.conflict = Some(other))?;
                attempt.settled();
                Err(err)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock if held
    ///
    /// The local state moves to RELEASED even when the request fails.
    ///
    /// # Errors
    /// [`SyncError::Network`] if the release request fails.
    pub async fn release(&self) -> SyncResult<()> {
        if !self.inner.mark_released() {
            return Ok(());
        }
        self.inner.send_release().await
    }
}

/// Scope of a held lock
///
/// Dropping the guard without calling [`LockGuard::release`] schedules the
/// release on the current runtime.
#[must_use = "dropping the guard releases the lock"]
#[derive(Debug)]
pub struct LockGuard {
    coordinator: LockCoordinator,
    armed: bool,
}

impl LockGuard {
    /// Coordinator owning the lock
    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// Release now
    ///
    /// # Errors
    /// [`SyncError::Network`] if the release request fails.
    pub async fn release(mut self) -> SyncResult<()> {
        self.armed = false;
        self.coordinator.release().await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let inner = Arc::clone(&self.coordinator.inner);
        if !inner.mark_released() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = inner.send_release().await;
                });
            }
            Err(_) => {
                tracing::warn!(model = %inner.model, "no runtime to release lock, relying on expiry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockLockService;
    use crate::error::ApiError;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const ALL: [LockState; 6] = [
        LockState::Unlocked,
        LockState::Acquiring,
        LockState::Held,
        LockState::Renewing,
        LockState::Released,
        LockState::Lost,
    ];

    fn grant() -> LockGrant {
        LockGrant {
            holder: HolderId::new("me"),
            acquired_at: Utc::now(),
            expires_at: None,
        }
    }

    fn coordinator(mock: MockLockService) -> LockCoordinator {
        let config = SyncConfig::default().with_heartbeat_interval(Duration::from_secs(30));
        LockCoordinator::new(
            Arc::new(mock),
            ModelId::new("tm-1"),
            HolderId::new("me"),
            &config,
        )
    }

    #[test]
    fn transition_table() {
        assert!(validate_transition(LockState::Unlocked, LockState::Acquiring).is_ok());
        assert!(validate_transition(LockState::Acquiring, LockState::Unlocked).is_ok());
        assert!(validate_transition(LockState::Renewing, LockState::Lost).is_ok());
        assert!(validate_transition(LockState::Lost, LockState::Acquiring).is_ok());

        assert!(validate_transition(LockState::Unlocked, LockState::Held).is_err());
        assert!(validate_transition(LockState::Released, LockState::Held).is_err());
        assert!(validate_transition(LockState::Lost, LockState::Held).is_err());
    }

    #[test]
    fn heartbeat_tracker_resets_on_success() {
        let mut tracker = HeartbeatTracker::new(3);
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        tracker.record_success();
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure());
    }

    proptest! {
        #[test]
        fn prop_validate_matches_table(
            from in proptest::sample::select(ALL.to_vec()),
            to in proptest::sample::select(ALL.to_vec()),
        ) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_leaves_session_read_only() {
        let mut mock = MockLockService::new();
        mock.expect_acquire().returning(|_, _| {
            Ok(LockResponse::Held(LockHolder {
                holder: HolderId::new("alice"),
                acquired_at: Utc::now(),
            }))
        });
        let lock = coordinator(mock);

        let err = lock.acquire().await.unwrap_err();
        assert!(matches!(err, SyncError::LockConflict { ref holder, .. } if holder.as_str() == "alice"));
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(lock.is_read_only());
        assert_eq!(
            lock.snapshot().conflict.map(|c| c.holder),
            Some(HolderId::new("alice"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_lock_held() {
        let mut mock = MockLockService::new();
        mock.expect_acquire()
            .returning(|_, _| Ok(LockResponse::Granted(grant())));
        mock.expect_renew()
            .times(2..)
            .returning(|_, _| Ok(RenewOutcome::Renewed(grant())));
        mock.expect_release().returning(|_, _| Ok(()));
        let lock = coordinator(mock);

        let guard = lock.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_secs(95)).await;

        assert_eq!(lock.state(), LockState::Held);
        assert!(!lock.is_read_only());
        guard.release().await.unwrap();
        assert_eq!(lock.state(), LockState::Released);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failed_heartbeats_lose_the_lock() {
        let mut mock = MockLockService::new();
        mock.expect_acquire()
            .returning(|_, _| Ok(LockResponse::Granted(grant())));
        mock.expect_renew()
            .times(3)
            .returning(|_, _| Err(ApiError::Transport("timeout".into())));
        let lock = coordinator(mock);
        let mut rx = lock.subscribe();

        let guard = lock.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(lock.state(), LockState::Held);
        assert_eq!(lock.snapshot().heartbeat_failures, 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(lock.state(), LockState::Lost);
        assert!(lock.is_read_only());
        assert_eq!(rx.borrow_and_update().state, LockState::Lost);

        // Nothing to release once lost.
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn stolen_lock_reports_new_holder() {
        let mut mock = MockLockService::new();
        mock.expect_acquire()
            .returning(|_, _| Ok(LockResponse::Granted(grant())));
        mock.expect_renew().times(1).returning(|_, _| {
            Ok(RenewOutcome::Stolen(LockHolder {
                holder: HolderId::new("bob"),
                acquired_at: Utc::now(),
            }))
        });
        let lock = coordinator(mock);

        let _guard = lock.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let snapshot = lock.snapshot();
        assert_eq!(snapshot.state, LockState::Lost);
        assert_eq!(snapshot.conflict.map(|c| c.holder), Some(HolderId::new("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_guard_releases() {
        let mut mock = MockLockService::new();
        mock.expect_acquire()
            .returning(|_, _| Ok(LockResponse::Granted(grant())));
        mock.expect_release().times(1).returning(|_, _| Ok(()));
        let lock = coordinator(mock);

        {
            let _guard = lock.acquire().await.unwrap();
        }
        assert_eq!(lock.state(), LockState::Released);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Re-acquisition after release is allowed.
        assert!(validate_transition(lock.state(), LockState::Acquiring).is_ok());
    }

    /// Lock service that never answers in time
    struct StalledLocks;

    #[async_trait::async_trait]
    impl LockService for StalledLocks {
        async fn acquire(&self, _: &ModelId, _: &HolderId) -> Result<LockResponse, ApiError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(LockResponse::Granted(grant()))
        }

        async fn renew(&self, _: &ModelId, _: &HolderId) -> Result<RenewOutcome, ApiError> {
            Ok(RenewOutcome::Renewed(grant()))
        }

        async fn release(&self, _: &ModelId, _: &HolderId) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_acquire_returns_to_unlocked() {
        let lock = LockCoordinator::new(
            Arc::new(StalledLocks),
            ModelId::new("tm-1"),
            HolderId::new("me"),
            &SyncConfig::default(),
        );

        let attempt = tokio::time::timeout(Duration::from_secs(1), lock.acquire()).await;
        assert!(attempt.is_err());
        assert_eq!(lock.state(), LockState::Unlocked);

        // A fresh attempt is allowed to start again.
        let retry = tokio::time::timeout(Duration::from_secs(1), lock.acquire()).await;
        assert!(retry.is_err());
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_while_held_is_rejected() {
        let mut mock = MockLockService::new();
        mock.expect_acquire()
            .times(1)
            .returning(|_, _| Ok(LockResponse::Granted(grant())));
        mock.expect_release().returning(|_, _| Ok(()));
        let lock = coordinator(mock);

        let guard = lock.acquire().await.unwrap();
        assert!(matches!(lock.acquire().await, Err(SyncError::LockState(_))));
        guard.release().await.unwrap();
    }
}
