//! Interrupt event replay
//!
//! A collaborating agent pushes catalog edits as [`InterruptEvent`]s. Events
//! can arrive before the model has loaded; [`InterruptQueue`] buffers them in
//! arrival order and applies them FIFO once marked ready. Each correlation id
//! is handled at most once. An event that fails to apply is logged, skipped
//! and acknowledged as rejected; it never blocks the events behind it.

use crate::api::{AckSink, InterruptAck};
use crate::error::{SyncError, SyncResult};
use crate::handle::ModelHandle;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tm_model::{CorrelationId, InterruptEvent, ModelError, ModelId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Decode an event from its JSON payload
///
/// # Errors
/// [`SyncError::Serialization`] if the payload is not a known event.
pub fn decode(value: serde_json::Value) -> SyncResult<InterruptEvent> {
    Ok(serde_json::from_value(value)?)
}

/// FIFO buffer of pending interrupt events
#[derive(Debug, Default)]
pub struct InterruptQueue {
    pending: VecDeque<InterruptEvent>,
    seen: HashSet<CorrelationId>,
    ready: bool,
}

impl InterruptQueue {
    /// Empty queue, not ready
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an event; returns `false` for a duplicate correlation id
    pub fn push(&mut self, event: InterruptEvent) -> bool {
        if !self.seen.insert(event.correlation_id.clone()) {
            tracing::debug!(correlation_id = %event.correlation_id, "duplicate interrupt dropped");
            return false;
        }
        tracing::debug!(
            correlation_id = %event.correlation_id,
            operation = event.operation.name(),
            queued = self.pending.len() + 1,
            "interrupt queued"
        );
        self.pending.push_back(event);
        true
    }

    /// Model data is available; buffered events may be applied
    #[inline]
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Whether events are being applied
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Events waiting to be applied
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a correlation id was already accepted
    #[inline]
    #[must_use]
    pub fn has_seen(&self, id: &CorrelationId) -> bool {
        self.seen.contains(id)
    }

    /// Apply buffered events to the model behind `handle`
    ///
    /// Stops, keeping the remaining events queued, if the model is unloaded.
    pub fn drain(&mut self, handle: &ModelHandle) -> Vec<InterruptAck> {
        if !self.ready {
            return Vec::new();
        }
        let mut acks = Vec::with_capacity(self.pending.len());
        while let Some(event) = self.pending.pop_front() {
            let Some(result) = handle.update(|model| model.apply(&event.operation)) else {
                tracing::debug!("model unloaded, holding interrupts");
                self.pending.push_front(event);
                break;
            };
            acks.push(Self::ack_for(&event, result));
        }
        acks
    }

    fn ack_for(event: &InterruptEvent, result: Result<usize, ModelError>) -> InterruptAck {
        let id = event.correlation_id.clone();
        match result {
            Ok(changed) => {
                tracing::info!(
                    correlation_id = %id,
                    operation = event.operation.name(),
                    changed,
                    "interrupt applied"
                );
                InterruptAck::applied(id)
            }
            Err(e) => {
                tracing::warn!(
                    correlation_id = %id,
                    operation = event.operation.name(),
                    error = %e,
                    "interrupt rejected"
                );
                InterruptAck::rejected(id, e.to_string())
            }
        }
    }
}

enum PumpMessage {
    Event(InterruptEvent),
    Ready,
}

/// Background task feeding an [`InterruptQueue`]
///
/// Events are sent through [`InterruptPump::push`]; the task applies them to
/// the shared model and forwards the acknowledgments to an [`AckSink`].
#[derive(Debug)]
pub struct InterruptPump {
    tx: mpsc::UnboundedSender<PumpMessage>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for PumpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(e) => f.debug_tuple("Event").field(&e.correlation_id).finish(),
            Self::Ready => f.write_str("Ready"),
        }
    }
}

impl InterruptPump {
    /// Start the pump for `model`
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(model: ModelId, handle: ModelHandle, acks: Arc<dyn AckSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump_loop(model, handle, acks, rx));
        Self { tx, task }
    }

    /// Hand an event to the pump
    ///
    /// # Errors
    /// [`SyncError::Config`] if the pump has shut down.
    pub fn push(&self, event: InterruptEvent) -> SyncResult<()> {
        self.tx
            .send(PumpMessage::Event(event))
            .map_err(|_| SyncError::config("interrupt pump stopped"))
    }

    /// Signal that the model has loaded
    pub fn mark_ready(&self) {
        let _ = self.tx.send(PumpMessage::Ready);
    }

    /// Stop accepting events and wait for buffered work to finish
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "interrupt pump panicked");
            }
        }
    }
}

async fn pump_loop(
    model: ModelId,
    handle: ModelHandle,
    acks: Arc<dyn AckSink>,
    mut rx: mpsc::UnboundedReceiver<PumpMessage>,
) {
    let mut queue = InterruptQueue::new();
    while let Some(message) = rx.recv().await {
        match message {
            PumpMessage::Event(event) => {
                queue.push(event);
            }
            PumpMessage::Ready => queue.mark_ready(),
        }
        for ack in queue.drain(&handle) {
            if let Err(e) = acks.acknowledge(&model, ack.clone()).await {
                tracing::warn!(%model, correlation_id = %ack.correlation_id, error = %e, "interrupt ack failed");
            }
        }
    }
    tracing::debug!(%model, pending = queue.len(), "interrupt pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AckStatus;
    use crate::error::ApiError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tm_model::{InterruptOp, Threat, ThreatModel};

    fn add(id: &str, name: &str) -> InterruptEvent {
        InterruptEvent::new(id, InterruptOp::AddThreats(vec![Threat::new(name)]))
    }

    #[derive(Default)]
    struct RecordingSink {
        acks: Mutex<Vec<InterruptAck>>,
    }

    #[async_trait::async_trait]
    impl AckSink for RecordingSink {
        async fn acknowledge(&self, _model: &ModelId, ack: InterruptAck) -> Result<(), ApiError> {
            self.acks.lock().push(ack);
            Ok(())
        }
    }

    #[test]
    fn decode_event_payload() {
        let event = decode(serde_json::json!({
            "correlation_id": "c-1",
            "operation": {"type": "delete_threats", "payload": [{"name": "Replay"}]}
        }))
        .unwrap();
        assert_eq!(event.correlation_id.as_str(), "c-1");
        assert_eq!(event.operation.name(), "delete_threats");

        assert!(decode(serde_json::json!({"correlation_id": "c-2"})).is_err());
    }

    #[test]
    fn events_buffer_until_ready() {
        let handle = ModelHandle::loaded(ThreatModel::new("tm-1", "v1"));
        let mut queue = InterruptQueue::new();
        queue.push(add("c-1", "first"));
        queue.push(add("c-2", "second"));

        assert!(queue.drain(&handle).is_empty());
        assert_eq!(queue.len(), 2);

        queue.mark_ready();
        let acks = queue.drain(&handle);
        assert_eq!(acks.len(), 2);
        let names = handle.read(|m| m.threats.iter().map(|t| t.name.clone()).collect::<Vec<_>>());
        assert_eq!(names, Some(vec!["first".to_string(), "second".to_string()]));
    }

    #[test]
    fn same_correlation_id_applies_once() {
        let handle = ModelHandle::loaded(ThreatModel::new("tm-1", "v1"));
        let mut queue = InterruptQueue::new();
        queue.mark_ready();

        assert!(queue.push(add("c-1", "only")));
        assert_eq!(queue.drain(&handle).len(), 1);
        assert!(!queue.push(add("c-1", "only")));
        assert!(queue.drain(&handle).is_empty());

        assert_eq!(handle.read(|m| m.threats.len()), Some(1));
    }

    #[test]
    fn failing_event_is_isolated() {
        let handle = ModelHandle::loaded(ThreatModel::new("tm-1", "v1"));
        let mut queue = InterruptQueue::new();
        queue.mark_ready();
        queue.push(InterruptEvent::new(
            "c-1",
            InterruptOp::EditThreats(vec![Threat::new("missing")]),
        ));
        queue.push(add("c-2", "after"));

        let acks = queue.drain(&handle);
        assert!(matches!(acks[0].status, AckStatus::Rejected { .. }));
        assert!(acks[1].is_applied());
        assert_eq!(handle.read(|m| m.threats.len()), Some(1));
    }

    #[test]
    fn unloaded_model_keeps_events() {
        let handle = ModelHandle::new();
        let mut queue = InterruptQueue::new();
        queue.mark_ready();
        queue.push(add("c-1", "x"));

        assert!(queue.drain(&handle).is_empty());
        assert_eq!(queue.len(), 1);

        handle.set(ThreatModel::new("tm-1", "v1"));
        assert_eq!(queue.drain(&handle).len(), 1);
    }

    #[tokio::test]
    async fn pump_applies_after_ready_and_acks() {
        let handle = ModelHandle::new();
        let sink = Arc::new(RecordingSink::default());
        let pump = InterruptPump::spawn(ModelId::new("tm-1"), handle.clone(), sink.clone());

        pump.push(add("c-1", "early")).unwrap();
        pump.push(add("c-1", "early")).unwrap();
        handle.set(ThreatModel::new("tm-1", "v1"));
        pump.mark_ready();
        pump.push(add("c-2", "late")).unwrap();
        pump.shutdown().await;

        let acks = sink.acks.lock();
        let ids: Vec<&str> = acks.iter().map(|a| a.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert_eq!(handle.read(|m| m.threats.len()), Some(2));
    }
}
