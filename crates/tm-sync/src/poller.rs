//! Backend status polling
//!
//! [`StatusPoller`] fetches a model's processing status on a fixed interval
//! and reports each observed transition exactly once. Polling pauses when the
//! model reaches a terminal state and resumes on [`PollerHandle::trigger`].
//!
//! Requests never overlap: the loop awaits each fetch before waiting for the
//! next tick, and missed ticks are delayed rather than burst.

use crate::api::StatusSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tm_model::{ModelId, ProcessingStatus, StatusReport};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// An observed status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    /// Previous status, `None` for the first observation
    pub from: Option<ProcessingStatus>,
    /// New status
    pub to: ProcessingStatus,
    /// Report that produced the change
    pub report: StatusReport,
    /// Status went backwards or a new session started
    pub new_run: bool,
}

impl StatusTransition {
    /// Whether the new status ends polling
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

/// Turns a stream of reports into transitions
///
/// Repeated identical reports yield nothing.
#[derive(Debug, Default, Clone)]
pub struct TransitionDetector {
    last: Option<StatusReport>,
}

impl TransitionDetector {
    /// Detector with no observations
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed status
    #[inline]
    #[must_use]
    pub fn last_status(&self) -> Option<ProcessingStatus> {
        self.last.as_ref().map(|r| r.status)
    }

    /// Record a report, returning the transition it represents if any
    pub fn observe(&mut self, report: StatusReport) -> Option<StatusTransition> {
        let transition = match &self.last {
            None => StatusTransition {
                from: None,
                to: report.status,
                report: report.clone(),
                new_run: false,
            },
            Some(last) => {
                let new_session = matches!(
                    (&last.session_id, &report.session_id),
                    (Some(a), Some(b)) if a != b
                );
                if last.status == report.status && !new_session {
                    return None;
                }
                StatusTransition {
                    from: Some(last.status),
                    to: report.status,
                    report: report.clone(),
                    new_run: new_session
                        || ProcessingStatus::is_regression(last.status, report.status),
                }
            }
        };
        self.last = Some(report);
        Some(transition)
    }
}

/// Why a poller stopped producing transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Model reached COMPLETE
    Completed,
    /// Model reached FAILED
    Failed {
        /// Backend detail, if any
        detail: Option<String>,
    },
    /// Poller was stopped or dropped
    Stopped,
}

struct Shared {
    disposed: AtomicBool,
    rearm: Notify,
    outcome: watch::Sender<Option<PollOutcome>>,
}

/// Spawns status polling loops
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller;

impl StatusPoller {
    /// Start polling `model`, calling `on_change` for every transition
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<F>(
        source: Arc<dyn StatusSource>,
        model: ModelId,
        interval: Duration,
        on_change: F,
    ) -> PollerHandle
    where
        F: FnMut(&StatusTransition) + Send + 'static,
    {
        let (outcome, outcome_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            disposed: AtomicBool::new(false),
            rearm: Notify::new(),
            outcome,
        });
        let task = tokio::spawn(poll_loop(
            source,
            model,
            interval,
            on_change,
            Arc::clone(&shared),
        ));
        PollerHandle {
            shared,
            outcome: outcome_rx,
            task,
        }
    }
}

async fn poll_loop<F>(
    source: Arc<dyn StatusSource>,
    model: ModelId,
    interval: Duration,
    mut on_change: F,
    shared: Arc<Shared>,
) where
    F: FnMut(&StatusTransition) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut detector = TransitionDetector::new();
    tracing::info!(%model, ?interval, "status polling started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shared.rearm.notified() => {}
        }
        if shared.disposed.load(Ordering::Acquire) {
            break;
        }

        let report = match source.fetch_status(&model).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(%model, error = %e, "status fetch failed");
                continue;
            }
        };
        if shared.disposed.load(Ordering::Acquire) {
            break;
        }
        tracing::debug!(%model, status = %report.status, "status polled");

        let Some(transition) = detector.observe(report) else {
            continue;
        };
        tracing::info!(
            %model,
            from = ?transition.from,
            to = %transition.to,
            new_run = transition.new_run,
            "status transition"
        );
        on_change(&transition);

        let outcome = match transition.to {
            ProcessingStatus::Complete => PollOutcome::Completed,
            ProcessingStatus::Failed => PollOutcome::Failed {
                detail: transition.report.detail.clone(),
            },
            _ => continue,
        };
        tracing::info!(%model, ?outcome, "status polling paused");
        shared.outcome.send_replace(Some(outcome));

        // Parked until re-armed.
        shared.rearm.notified().await;
        if shared.disposed.load(Ordering::Acquire) {
            break;
        }
        tracing::info!(%model, "status polling re-armed");
        ticker.reset_immediately();
    }
}

/// Control handle for a running poller
///
/// Dropping the handle stops the poller.
pub struct PollerHandle {
    shared: Arc<Shared>,
    outcome: watch::Receiver<Option<PollOutcome>>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("disposed", &self.is_stopped())
            .field("outcome", &*self.outcome.borrow())
            .finish_non_exhaustive()
    }
}

impl PollerHandle {
    /// Resume polling, e.g. after a replay was requested
    ///
    /// Also forces an immediate fetch while polling is active.
    pub fn trigger(&self) {
        if self.is_stopped() {
            return;
        }
        self.shared.outcome.send_replace(None);
        self.shared.rearm.notify_one();
    }

    /// Stop polling; no callback runs after this returns
    pub fn stop(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
        self.shared.outcome.send_replace(Some(PollOutcome::Stopped));
    }

    /// Whether the poller was stopped
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Wait until polling completes, fails or is stopped
    pub async fn join(&mut self) -> PollOutcome {
        loop {
            if let Some(outcome) = self.outcome.borrow_and_update().clone() {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return PollOutcome::Stopped;
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockStatusSource;
    use crate::error::ApiError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn report(status: ProcessingStatus) -> StatusReport {
        StatusReport::new(status)
    }

    fn scripted(statuses: Vec<Result<StatusReport, ApiError>>) -> Arc<dyn StatusSource> {
        let script = Arc::new(Mutex::new(VecDeque::from(statuses)));
        let mut mock = MockStatusSource::new();
        mock.expect_fetch_status().returning(move |_| {
            script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(report(ProcessingStatus::Complete)))
        });
        Arc::new(mock)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<StatusTransition>>>,
        impl FnMut(&StatusTransition) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |t: &StatusTransition| sink.lock().push(t.clone()))
    }

    #[test]
    fn detector_suppresses_repeats() {
        let mut detector = TransitionDetector::new();
        let first = detector.observe(report(ProcessingStatus::Start)).unwrap();
        assert_eq!(first.from, None);
        assert!(detector.observe(report(ProcessingStatus::Start)).is_none());

        let next = detector.observe(report(ProcessingStatus::Processing)).unwrap();
        assert_eq!(next.from, Some(ProcessingStatus::Start));
        assert!(!next.new_run);
    }

    #[test]
    fn detector_flags_new_runs() {
        let mut detector = TransitionDetector::new();
        detector.observe(report(ProcessingStatus::Finalize).with_session("s1"));

        let regressed = detector
            .observe(report(ProcessingStatus::Start).with_session("s1"))
            .unwrap();
        assert!(regressed.new_run);

        let new_session = detector
            .observe(report(ProcessingStatus::Start).with_session("s2"))
            .unwrap();
        assert!(new_session.new_run);
        assert_eq!(new_session.from, Some(ProcessingStatus::Start));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_processing_is_reported_once() {
        let source = scripted(vec![
            Ok(report(ProcessingStatus::Start)),
            Ok(report(ProcessingStatus::Processing)),
            Ok(report(ProcessingStatus::Processing)),
            Ok(report(ProcessingStatus::Complete)),
        ]);
        let (seen, on_change) = recorder();

        let mut handle =
            StatusPoller::spawn(source, ModelId::new("tm-1"), Duration::from_secs(1), on_change);
        assert_eq!(handle.join().await, PollOutcome::Completed);

        let seen = seen.lock();
        let between: Vec<_> = seen
            .iter()
            .filter_map(|t| t.from.map(|from| (from, t.to)))
            .collect();
        assert_eq!(
            between,
            vec![
                (ProcessingStatus::Start, ProcessingStatus::Processing),
                (ProcessingStatus::Processing, ProcessingStatus::Complete),
            ]
        );
        assert_eq!(seen[0].from, None);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_do_not_stop_polling() {
        let source = scripted(vec![
            Err(ApiError::Transport("reset".into())),
            Ok(report(ProcessingStatus::Processing)),
            Err(ApiError::status(502, "bad gateway")),
            Ok(report(ProcessingStatus::Failed).with_detail("model error")),
        ]);
        let (seen, on_change) = recorder();

        let mut handle =
            StatusPoller::spawn(source, ModelId::new("tm-1"), Duration::from_secs(1), on_change);

        assert_eq!(
            handle.join().await,
            PollOutcome::Failed {
                detail: Some("model error".to_string())
            }
        );
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_resumes_after_failure() {
        let source = scripted(vec![
            Ok(report(ProcessingStatus::Failed)),
            Ok(report(ProcessingStatus::Start)),
            Ok(report(ProcessingStatus::Complete)),
        ]);
        let (seen, on_change) = recorder();

        let mut handle =
            StatusPoller::spawn(source, ModelId::new("tm-1"), Duration::from_secs(1), on_change);
        assert!(matches!(handle.join().await, PollOutcome::Failed { .. }));

        handle.trigger();
        assert_eq!(handle.join().await, PollOutcome::Completed);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].new_run);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_callbacks() {
        let source = scripted(vec![
            Ok(report(ProcessingStatus::Start)),
            Ok(report(ProcessingStatus::Processing)),
        ]);
        let (seen, on_change) = recorder();

        let mut handle =
            StatusPoller::spawn(source, ModelId::new("tm-1"), Duration::from_secs(1), on_change);
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.stop();
        let count = seen.lock().len();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(seen.lock().len(), count);
        assert_eq!(handle.join().await, PollOutcome::Stopped);
        assert!(handle.is_stopped());
    }
}
