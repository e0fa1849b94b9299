use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CancelSignal — external cancellation entry point
// ---------------------------------------------------------------------------

/// Broadcast-based cancellation coordinator for one job run.
///
/// Clones share state, so the signal can be handed to a Ctrl-C handler, an
/// RPC surface, and every action that blocks. Actions `select!` on
/// [`CancelSignal::cancelled`] alongside their blocking call; the driver
/// polls [`CancelSignal::is_cancelled`] between actions.
///
/// ```ignore
/// let cancel = CancelSignal::new();
/// tokio::select! {
///     _ = cancel.cancelled() => { /* unwind, return JOB_CANCELLED */ }
///     out = wait_for_process() => { /* normal path */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CancelSignal {
    /// Broadcast sender — wakes every in-flight waiter.
    trigger: broadcast::Sender<()>,
    /// Atomic flag for cheap polling and late subscribers.
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the raw broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    /// Check whether cancellation has been requested (non-blocking).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation. Idempotent; only the first call broadcasts.
    pub fn trigger(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("cancellation requested");
            let _ = self.trigger.send(());
        } else {
            debug!("cancellation already requested");
        }
    }

    /// Resolve once cancellation has been requested. Returns immediately
    /// when the request already happened.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.trigger.subscribe();
        // The trigger may have fired between the check and the subscribe.
        if self.is_cancelled() {
            return;
        }
        // Any outcome (message, lag, close) means a trigger happened; the
        // sender cannot close while `self` holds it.
        let _ = rx.recv().await;
    }

    /// Number of raw subscribers currently listening.
    pub fn subscriber_count(&self) -> usize {
        self.trigger.receiver_count()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
