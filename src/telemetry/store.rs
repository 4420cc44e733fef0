//! # Telemetry Store
//!
//! Single-writer, multi-reader shared state: latest record, link status,
//! bounded history and the observer registry, all behind one lock.
//!
//! Keeping the observer registry under the same lock as the state means a
//! newly registered observer sees a snapshot and then exactly the events
//! published after it, with nothing missed and nothing repeated.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::history::HistoryBuffer;
use super::hub::{ObserverId, ObserverRegistry, TelemetryEvent};
use crate::config::{StoreConfig, MAX_SNAPSHOT_HISTORY};
use crate::protocol::types::{LinkStatus, TelemetryRecord};

/// When a latched link error stops being reported on records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClearPolicy {
    /// Cleared by the first frame carrying ENV/AIR/OZ/UV/PMS data
    #[default]
    SensorData,
    /// Cleared by any frame
    AnyFrame,
    /// Cleared only when the link reports `Connected` again
    Reconnect,
}

/// Consistent view of the store at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub latest: Option<Arc<TelemetryRecord>>,
    /// Most recent history entries, oldest first
    pub history: Vec<Arc<TelemetryRecord>>,
    pub link_status: LinkStatus,
}

/// A registered observer: initial snapshot plus the live event queue
#[derive(Debug)]
pub struct Subscription {
    pub id: ObserverId,
    pub snapshot: Snapshot,
    pub events: mpsc::Receiver<TelemetryEvent>,
}

impl Subscription {
    /// Next live event, or `None` once the store is gone
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.events.recv().await
    }
}

#[derive(Debug)]
struct StoreState {
    latest: Option<Arc<TelemetryRecord>>,
    status: LinkStatus,
    history: HistoryBuffer,
    latched_error: Option<String>,
    observers: ObserverRegistry,
    published: u64,
}

/// Shared telemetry state; clones refer to the same store
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    inner: Arc<Mutex<StoreState>>,
    snapshot_history: usize,
    policy: ErrorClearPolicy,
}

impl TelemetryStore {
    pub fn new(
        history_capacity: usize,
        snapshot_history: usize,
        observer_queue: usize,
        policy: ErrorClearPolicy,
    ) -> Self {
        let state = StoreState {
            latest: None,
            status: LinkStatus::Disconnected,
            history: HistoryBuffer::new(history_capacity),
            latched_error: None,
            observers: ObserverRegistry::new(observer_queue),
            published: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            snapshot_history: snapshot_history.min(MAX_SNAPSHOT_HISTORY),
            policy,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.history_capacity,
            config.snapshot_history,
            config.observer_queue,
            config.error_clear_policy,
        )
    }

    // Poisoning is ignored; no mutation below can stop halfway.
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finalise and publish a record
    ///
    /// Applies the error-clear policy, stamps the latched error note, then
    /// replaces the latest record, appends to history and notifies observers
    /// in one critical section. The returned record is never mutated again.
    pub fn publish_record(&self, mut record: TelemetryRecord, has_sensor_data: bool) -> Arc<TelemetryRecord> {
        let mut state = self.state();

        let clears = match self.policy {
            ErrorClearPolicy::SensorData => has_sensor_data,
            ErrorClearPolicy::AnyFrame => true,
            ErrorClearPolicy::Reconnect => false,
        };
        if clears {
            if let Some(err) = state.latched_error.take() {
                info!("Clearing link error after fresh data: {}", err);
            }
        }
        record.error = state.latched_error.clone();

        let record = Arc::new(record);
        state.latest = Some(Arc::clone(&record));
        state.history.push(Arc::clone(&record));
        state.published += 1;
        let report = state
            .observers
            .publish(&TelemetryEvent::TelemetryUpdate(Arc::clone(&record)));
        trace!(
            "Record {} sent to {} observers ({} dropped, {} gone)",
            state.published,
            report.delivered,
            report.dropped,
            report.removed
        );

        record
    }

    /// Record a link status; observers hear only about actual transitions
    ///
    /// Returns true when the status changed.
    pub fn set_link_status(&self, status: LinkStatus) -> bool {
        let mut state = self.state();
        if state.status == status {
            return false;
        }

        match &status {
            LinkStatus::Error(msg) => state.latched_error = Some(msg.clone()),
            LinkStatus::Connected if self.policy == ErrorClearPolicy::Reconnect => {
                state.latched_error = None
            }
            _ => {}
        }

        debug!("Link status {} -> {}", state.status, status);
        state.status = status.clone();
        let report = state.observers.publish(&TelemetryEvent::LinkStatusUpdate(status));
        trace!(
            "Status sent to {} observers ({} dropped, {} gone)",
            report.delivered,
            report.dropped,
            report.removed
        );
        true
    }

    /// Register an observer, atomically with taking its snapshot
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.state();
        let snapshot = Self::snapshot_of(&state, self.snapshot_history);
        let (id, events) = state.observers.register();
        Subscription { id, snapshot, events }
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.state().observers.unregister(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        Self::snapshot_of(&self.state(), self.snapshot_history)
    }

    fn snapshot_of(state: &StoreState, history: usize) -> Snapshot {
        Snapshot {
            latest: state.latest.clone(),
            history: state.history.tail(history),
            link_status: state.status.clone(),
        }
    }

    pub fn latest(&self) -> Option<Arc<TelemetryRecord>> {
        self.state().latest.clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.state().status.clone()
    }

    /// Entire retained history, oldest first
    pub fn history(&self) -> Vec<Arc<TelemetryRecord>> {
        let state = self.state();
        state.history.tail(state.history.len())
    }

    pub fn latched_error(&self) -> Option<String> {
        self.state().latched_error.clone()
    }

    /// Records published since start-up
    pub fn published_count(&self) -> u64 {
        self.state().published
    }

    pub fn observer_count(&self) -> usize {
        self.state().observers.len()
    }
}
