//! # Broadcast Hub
//!
//! Registry of live observers. Each observer owns a bounded queue so a slow
//! consumer only ever loses its own events and never stalls ingestion.
//!
//! The registry is not synchronised by itself; the telemetry store keeps it
//! under the same lock as the state it mirrors, which is what makes
//! snapshot-then-subscribe atomic.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::protocol::types::{LinkStatus, TelemetryRecord};

/// Identifier handed out on registration
pub type ObserverId = u64;

/// A backlogged observer is reported at warn level once per this many drops
pub const DROP_WARN_INTERVAL: u64 = 100;

/// Live event pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum TelemetryEvent {
    #[serde(rename = "telemetry-update")]
    TelemetryUpdate(Arc<TelemetryRecord>),
    #[serde(rename = "link-status-update")]
    LinkStatusUpdate(LinkStatus),
}

impl TelemetryEvent {
    /// Wire name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::TelemetryUpdate(_) => "telemetry-update",
            TelemetryEvent::LinkStatusUpdate(_) => "link-status-update",
        }
    }
}

#[derive(Debug)]
struct Observer {
    id: ObserverId,
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: u64,
}

/// Outcome of one publish
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

/// Observer registry with one bounded channel per observer
#[derive(Debug)]
pub struct ObserverRegistry {
    observers: Vec<Observer>,
    next_id: ObserverId,
    queue_depth: usize,
}

impl ObserverRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            observers: Vec::new(),
            next_id: 1,
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register a new observer and return its id and event queue
    pub fn register(&mut self) -> (ObserverId, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push(Observer { id, tx, dropped: 0 });
        debug!("Observer {} registered ({} active)", id, self.observers.len());
        (id, rx)
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        before != self.observers.len()
    }

    /// Offer an event to every observer without waiting
    ///
    /// A full queue loses this event for that observer only. A closed queue
    /// means the observer went away and it is unregistered.
    pub fn publish(&mut self, event: &TelemetryEvent) -> PublishReport {
        let mut report = PublishReport::default();

        self.observers.retain_mut(|observer| match observer.tx.try_send(event.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                observer.dropped += 1;
                report.dropped += 1;
                if warn_on_drop(observer.dropped) {
                    warn!(
                        "Observer {} is backlogged, dropped {} ({} total)",
                        observer.id,
                        event.name(),
                        observer.dropped
                    );
                } else {
                    debug!("Observer {} dropped {}", observer.id, event.name());
                }
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Observer {} went away", observer.id);
                report.removed += 1;
                false
            }
        });

        report
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// First drop and every `DROP_WARN_INTERVAL`th after it
fn warn_on_drop(dropped: u64) -> bool {
    dropped == 1 || dropped % DROP_WARN_INTERVAL == 0
}
