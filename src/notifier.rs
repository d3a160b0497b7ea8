//! Delivery of reconciled parameters to the host application
//!
//! Registered listeners are called synchronously in registration order. Each
//! listener succeeds or fails on its own: an error or a panic is logged and
//! counted, and delivery continues with the next listener. Every delivery is
//! also published on a broadcast channel for async subscribers.

use crate::models::ReconciledParams;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

const BROADCAST_CAPACITY: usize = 64;

/// Host-side handler for delivered parameters.
pub trait ParamsListener: Send + Sync {
    fn on_params(&self, event: &ReconciledParams) -> anyhow::Result<()>;
}

impl<F> ParamsListener for F
where
    F: Fn(&ReconciledParams) -> anyhow::Result<()> + Send + Sync,
{
    fn on_params(&self, event: &ReconciledParams) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by [`Notifier::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-delivery outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

pub struct Notifier {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ParamsListener>)>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<ReconciledParams>,
}

impl Notifier {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            event_tx,
        }
    }

    pub fn register(&self, listener: impl ParamsListener + 'static) -> ListenerId {
        self.register_arc(Arc::new(listener))
    }

    pub fn register_arc(&self, listener: Arc<dyn ParamsListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Receive every delivered event (process-local publish).
    pub fn subscribe(&self) -> broadcast::Receiver<ReconciledParams> {
        self.event_tx.subscribe()
    }

    pub fn deliver(&self, event: &ReconciledParams) -> DeliveryReport {
        // Snapshot so listeners may (un)register without deadlocking
        let listeners = self.listeners.read().clone();
        let mut report = DeliveryReport::default();

        for (id, listener) in &listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_params(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        listener = id.0,
                        event_id = %event.event_id,
                        kind = %event.kind,
                        error = %e,
                        "Params listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        listener = id.0,
                        event_id = %event.event_id,
                        kind = %event.kind,
                        "Params listener panicked"
                    );
                }
            }
        }

        // No subscribers is not an error
        let subscribers = self.event_tx.send(event.clone()).unwrap_or(0);

        debug!(
            event_id = %event.event_id,
            kind = %event.kind,
            delivered = report.delivered,
            failed = report.failed,
            subscribers,
            "Params delivered"
        );
        report
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
