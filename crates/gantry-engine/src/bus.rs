use crate::context::ExecutionContext;
use crate::context::TransitionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TransitionNotice
// ---------------------------------------------------------------------------

/// One applied transition as published to observers: where the run went and
/// the wrapped failure cause, if any, at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionNotice {
    pub job_id: Option<Uuid>,
    pub job_name: String,
    pub from: crate::state::State,
    pub event: crate::state::Event,
    pub to: crate::state::State,
    pub failure: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionNotice {
    pub fn from_record(ctx: &ExecutionContext, record: &TransitionRecord) -> Self {
        Self {
            job_id: ctx.job_id(),
            job_name: ctx.job_name().to_string(),
            from: record.from,
            event: record.event,
            to: record.to,
            failure: ctx.failure().map(|f| f.chain()),
            at: record.at,
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionBus
// ---------------------------------------------------------------------------

/// A broadcast-style bus carrying one [`TransitionNotice`] per applied
/// transition, built on flume channels.
///
/// Each call to [`subscribe`] creates a new receiver that sees every notice
/// published after the subscription. The bus is thread-safe and cheap to
/// clone (it wraps its internals in an `Arc`). Publication is advisory: a
/// run proceeds identically with zero subscribers.
#[derive(Clone)]
pub struct TransitionBus {
    inner: Arc<Mutex<Vec<flume::Sender<TransitionNotice>>>>,
}

impl TransitionBus {
    /// Create a new, empty bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<TransitionNotice> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("TransitionBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish a notice to all current subscribers.
    ///
    /// Disconnected subscribers (whose receivers have been dropped) are
    /// automatically pruned.
    pub fn publish(&self, notice: TransitionNotice) {
        let mut senders = self.inner.lock().expect("TransitionBus lock poisoned");
        senders.retain(|tx| tx.send(notice.clone()).is_ok());
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("TransitionBus lock poisoned");
        senders.len()
    }
}

impl Default for TransitionBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Event, State};
    use gantry_core::types::JobRequestInputs;

    fn notice() -> TransitionNotice {
        let ctx = ExecutionContext::new(JobRequestInputs::new("bus-job"));
        let record = TransitionRecord::new(
            State::Initialize,
            Event::InitializeComplete,
            State::ResolveJobSpecification,
        );
        TransitionNotice::from_record(&ctx, &record)
    }

    #[test]
    fn subscribers_receive_published_notices() {
        let bus = TransitionBus::new();
        let rx = bus.subscribe();

        bus.publish(notice());

        let received = rx.try_recv().expect("notice delivered");
        assert_eq!(received.job_name, "bus-job");
        assert_eq!(received.from, State::Initialize);
        assert_eq!(received.to, State::ResolveJobSpecification);
        assert!(received.failure.is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = TransitionBus::new();
        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        bus.publish(notice());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = TransitionBus::new();
        bus.publish(notice());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
