//! # Link Manager
//!
//! Owns the physical serial link to the ground receiver.
//!
//! This module handles:
//! - Opening the configured device, retrying forever on failure
//! - Letting the receiver settle and discarding stale input after open
//! - Bounded-timeout reads so the stop flag is checked regularly
//! - Closing and backing off on read failure or disconnect
//! - Publishing every link status transition to the store

pub mod port_trait;

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::protocol::types::LinkStatus;
use crate::shutdown::Shutdown;
use crate::telemetry::store::TelemetryStore;
use port_trait::{LinkOpener, LinkPort};

pub use port_trait::{SerialOpener, TokioSerialPort};

/// Retry and timeout settings for the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    pub read_timeout: Duration,
    pub open_retry: Duration,
    pub read_retry: Duration,
    pub settle: Duration,
}

impl LinkTimings {
    pub fn from_config(config: &SerialConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            open_retry: config.open_retry(),
            read_retry: config.read_retry(),
            settle: config.settle(),
        }
    }
}

/// Result of one bounded read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Nothing arrived within the read timeout
    Idle,
    /// The read failed; the port is closed and the caller should reconnect
    Failed,
    /// No port is open, or a stop was requested
    Stopped,
}

/// Serial link lifecycle driver
pub struct LinkManager<O: LinkOpener> {
    opener: O,
    port: Option<Box<dyn LinkPort>>,
    store: TelemetryStore,
    timings: LinkTimings,
    shutdown: Shutdown,
}

impl<O: LinkOpener> std::fmt::Debug for LinkManager<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("target", &self.opener.describe())
            .field("open", &self.port.is_some())
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl<O: LinkOpener> LinkManager<O> {
    pub fn new(opener: O, store: TelemetryStore, timings: LinkTimings, shutdown: Shutdown) -> Self {
        Self {
            opener,
            port: None,
            store,
            timings,
            shutdown,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Open the link, retrying until it succeeds or a stop is requested
    ///
    /// Emits `Connecting` before every attempt and `Error` after each failed
    /// one. On success the receiver is given `settle` to boot, stale input is
    /// discarded and `Connected` is emitted.
    ///
    /// Returns false if a stop was requested before the link came up.
    pub async fn connect(&mut self) -> bool {
        while !self.shutdown.is_triggered() {
            self.store.set_link_status(LinkStatus::Connecting);
            debug!("Connecting to {}", self.opener.describe());

            match self.opener.open() {
                Ok(port) => {
                    self.port = Some(port);
                    if !pause(&self.shutdown, self.timings.settle).await {
                        self.close();
                        return false;
                    }
                    if let Some(port) = self.port.as_mut() {
                        if let Err(e) = port.clear_input() {
                            debug!("Could not clear input buffer: {}", e);
                        }
                    }
                    info!("Link up on {}", self.opener.describe());
                    self.store.set_link_status(LinkStatus::Connected);
                    return true;
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", self.opener.describe(), e);
                    self.store.set_link_status(LinkStatus::Error(e.to_string()));
                    if !pause(&self.shutdown, self.timings.open_retry).await {
                        return false;
                    }
                }
            }
        }
        false
    }

    /// Read once with the configured timeout
    ///
    /// A read error or a zero-length read (device unplugged) emits `Error`,
    /// closes the port and waits `read_retry` before returning `Failed`.
    pub async fn poll(&mut self, buf: &mut [u8]) -> PollOutcome {
        if self.shutdown.is_triggered() {
            return PollOutcome::Stopped;
        }
        let Some(port) = self.port.as_mut() else {
            return PollOutcome::Stopped;
        };

        let message = match tokio::time::timeout(self.timings.read_timeout, port.read(buf)).await {
            Err(_) => return PollOutcome::Idle,
            Ok(Ok(0)) => "device disconnected".to_string(),
            Ok(Ok(n)) => return PollOutcome::Data(n),
            Ok(Err(e)) => format!("read failed: {}", e),
        };

        warn!("Link lost on {}: {}", self.opener.describe(), message);
        self.store.set_link_status(LinkStatus::Error(message));
        self.close();
        if !pause(&self.shutdown, self.timings.read_retry).await {
            return PollOutcome::Stopped;
        }
        PollOutcome::Failed
    }

    /// Record that a frame arrived on the current connection
    pub fn mark_receiving(&self) {
        if self.store.link_status() == LinkStatus::Connected {
            self.store.set_link_status(LinkStatus::Receiving);
        }
    }

    /// Close the port, emit `Disconnected` and raise the stop flag
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        if self.port.take().is_some() {
            info!("Closed {}", self.opener.describe());
        }
        self.store.set_link_status(LinkStatus::Disconnected);
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Port {} closed", self.opener.describe());
        }
    }
}

/// Sleep unless a stop arrives first; returns false on stop
async fn pause(shutdown: &Shutdown, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => !shutdown.is_triggered(),
        _ = shutdown.wait() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::{ScriptedOpener, ScriptedPort, Step};
    use super::port_trait::MockLinkOpener;
    use super::*;
    use crate::error::TelemetryError;
    use crate::telemetry::hub::TelemetryEvent;
    use crate::telemetry::store::ErrorClearPolicy;
    use mockall::Sequence;
    use std::io;

    fn fast_timings() -> LinkTimings {
        LinkTimings {
            read_timeout: Duration::from_millis(20),
            open_retry: Duration::from_millis(5),
            read_retry: Duration::from_millis(5),
            settle: Duration::from_millis(1),
        }
    }

    fn store() -> TelemetryStore {
        TelemetryStore::new(10, 10, 64, ErrorClearPolicy::SensorData)
    }

    fn drain_statuses(rx: &mut tokio::sync::mpsc::Receiver<TelemetryEvent>) -> Vec<LinkStatus> {
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TelemetryEvent::LinkStatusUpdate(status) = event {
                statuses.push(status);
            }
        }
        statuses
    }

    #[tokio::test]
    async fn test_open_failure_then_success_sequence() {
        let mut opener = MockLinkOpener::new();
        let mut seq = Sequence::new();
        opener
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(TelemetryError::SerialPortNotFound("/dev/ttyUSB0".into())));
        opener
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Box::new(ScriptedPort::default()) as Box<dyn LinkPort>));
        opener.expect_describe().return_const("mock".to_string());

        let store = store();
        let mut sub = store.subscribe();
        let mut link = LinkManager::new(opener, store.clone(), fast_timings(), Shutdown::new());

        assert!(link.connect().await);
        assert!(link.is_open());
        assert_eq!(
            drain_statuses(&mut sub.events),
            vec![
                LinkStatus::Connecting,
                LinkStatus::Error("Serial port not found: /dev/ttyUSB0".into()),
                LinkStatus::Connecting,
                LinkStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_clears_stale_input() {
        let port = ScriptedPort::default();
        let opener = ScriptedOpener::new(vec![Ok(port.clone())]);
        let mut link = LinkManager::new(opener, store(), fast_timings(), Shutdown::new());

        assert!(link.connect().await);
        assert_eq!(port.clears(), 1);
    }

    #[tokio::test]
    async fn test_poll_data_and_idle() {
        let opener = ScriptedOpener::new(vec![Ok(ScriptedPort::data(&[b"hello"]))]);
        let mut link = LinkManager::new(opener, store(), fast_timings(), Shutdown::new());
        link.connect().await;

        let mut buf = [0u8; 16];
        assert_eq!(link.poll(&mut buf).await, PollOutcome::Data(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(link.poll(&mut buf).await, PollOutcome::Idle);
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn test_read_error_closes_and_reports() {
        let port = ScriptedPort::new(vec![Step::Error(io::ErrorKind::BrokenPipe)]);
        let opener = ScriptedOpener::new(vec![Ok(port)]);
        let store = store();
        let mut link = LinkManager::new(opener, store.clone(), fast_timings(), Shutdown::new());
        link.connect().await;

        let mut buf = [0u8; 16];
        assert_eq!(link.poll(&mut buf).await, PollOutcome::Failed);
        assert!(!link.is_open());
        assert!(store.link_status().is_error());
        assert_eq!(link.poll(&mut buf).await, PollOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_zero_length_read_is_disconnect() {
        let opener = ScriptedOpener::new(vec![Ok(ScriptedPort::new(vec![Step::Eof]))]);
        let store = store();
        let mut link = LinkManager::new(opener, store.clone(), fast_timings(), Shutdown::new());
        link.connect().await;

        let mut buf = [0u8; 16];
        assert_eq!(link.poll(&mut buf).await, PollOutcome::Failed);
        assert_eq!(store.link_status(), LinkStatus::Error("device disconnected".into()));
    }

    #[tokio::test]
    async fn test_connect_gives_up_on_shutdown() {
        let opener = ScriptedOpener::new(vec![]);
        let shutdown = Shutdown::new();
        let timings = LinkTimings {
            open_retry: Duration::from_secs(60),
            ..fast_timings()
        };
        let mut link = LinkManager::new(opener.clone(), store(), timings, shutdown.clone());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        });

        let connected = tokio::time::timeout(Duration::from_secs(2), link.connect())
            .await
            .unwrap();
        assert!(!connected);
        assert_eq!(opener.opens(), 1);
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_receiving_only_after_connected() {
        let opener = ScriptedOpener::new(vec![Ok(ScriptedPort::default())]);
        let store = store();
        let mut link = LinkManager::new(opener, store.clone(), fast_timings(), Shutdown::new());

        link.mark_receiving();
        assert_eq!(store.link_status(), LinkStatus::Disconnected);

        link.connect().await;
        link.mark_receiving();
        assert_eq!(store.link_status(), LinkStatus::Receiving);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let opener = ScriptedOpener::new(vec![Ok(ScriptedPort::default())]);
        let store = store();
        let mut sub = store.subscribe();
        let mut link = LinkManager::new(opener, store.clone(), fast_timings(), Shutdown::new());
        link.connect().await;

        link.shutdown();
        link.shutdown();
        assert!(!link.is_open());
        let statuses = drain_statuses(&mut sub.events);
        assert_eq!(statuses.last(), Some(&LinkStatus::Disconnected));
        assert_eq!(
            statuses.iter().filter(|s| **s == LinkStatus::Disconnected).count(),
            1
        );
        assert!(!link.connect().await);
    }

    #[tokio::test]
    async fn test_dropping_manager_releases_port() {
        let port = ScriptedPort::default();
        let opener = ScriptedOpener::new(vec![Ok(port.clone())]);
        let mut link = LinkManager::new(opener, store(), fast_timings(), Shutdown::new());
        link.connect().await;
        assert_eq!(std::sync::Arc::strong_count(&port.steps), 2);

        drop(link);
        assert_eq!(std::sync::Arc::strong_count(&port.steps), 1);
    }
}
