//! Online/offline tracking for the remote tier.
//!
//! [`OnlineMonitor`] owns the shared status flag, its change notifications and
//! the periodic heartbeat that probes the service layer. The flag is only
//! written by [`GatingAdvice`] as call outcomes come in; the heartbeat simply
//! issues probe calls through a gated client.

pub mod gating;
pub mod heartbeat;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::RemoteError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::worker::{BackgroundRunnable, BackgroundWorker};

pub use gating::GatingAdvice;
pub use heartbeat::ClientHeartbeat;

/// Reachability of the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct OnlineMonitorConfig {
    pub heartbeat_interval: Duration,
}

impl Default for OnlineMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// A lightweight call proving the remote tier is reachable.
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    async fn probe(&self) -> Result<(), RemoteError>;
}

/// Commands accepted by the heartbeat worker.
#[derive(Debug)]
pub enum HeartbeatCommand {
    ProbeNow,
}

struct HeartbeatRunnable {
    probe: Arc<dyn HeartbeatProbe>,
}

impl HeartbeatRunnable {
    async fn beat(&self) {
        if let Err(err) = self.probe.probe().await {
            debug!(error = %err, "heartbeat probe failed");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for HeartbeatRunnable {
    type Command = HeartbeatCommand;

    async fn run(&mut self, command: HeartbeatCommand) {
        match command {
            HeartbeatCommand::ProbeNow => self.beat().await,
        }
    }

    async fn on_tick(&mut self) {
        self.beat().await;
    }
}

/// Shared online/offline status with change notification and a heartbeat
/// lifecycle. Starts `Online`.
pub struct OnlineMonitor {
    online: AtomicBool,
    changes: watch::Sender<OnlineStatus>,
    config: OnlineMonitorConfig,
    heartbeat: Mutex<Option<BackgroundWorker<HeartbeatRunnable>>>,
}

impl OnlineMonitor {
    #[must_use]
    pub fn new(config: OnlineMonitorConfig) -> Self {
        let (changes, _) = watch::channel(OnlineStatus::Online);
        Self {
            online: AtomicBool::new(true),
            changes,
            config,
            heartbeat: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn status(&self) -> OnlineStatus {
        if self.online.load(Ordering::Acquire) {
            OnlineStatus::Online
        } else {
            OnlineStatus::Offline
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status() == OnlineStatus::Online
    }

    /// Sets the status, notifying subscribers on a transition. Returns whether
    /// the status changed.
    pub fn set_status(&self, status: OnlineStatus) -> bool {
        let online = status == OnlineStatus::Online;
        if self.online.swap(online, Ordering::AcqRel) == online {
            return false;
        }
        info!(?status, "remote tier status changed");
        self.changes.send_replace(status);
        true
    }

    pub(crate) fn record_success(&self) {
        self.set_status(OnlineStatus::Online);
    }

    pub(crate) fn record_unreachable(&self) {
        self.set_status(OnlineStatus::Offline);
    }

    /// Receiver observing every status transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OnlineStatus> {
        self.changes.subscribe()
    }

    /// Runs `observer` on a background task for every transition until the
    /// returned subscription is dropped. Must be called inside a tokio runtime.
    pub fn on_change<F>(&self, observer: F) -> Subscription
    where
        F: Fn(OnlineStatus) + Send + Sync + 'static,
    {
        let mut rx = self.changes.subscribe();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                observer(status);
            }
        });
        Subscription { handle }
    }

    /// Starts the periodic heartbeat. A no-op if it is already running.
    pub async fn start(&self, probe: Arc<dyn HeartbeatProbe>) {
        let mut heartbeat = self.heartbeat.lock().await;
        if heartbeat.as_ref().is_some_and(BackgroundWorker::is_running) {
            return;
        }
        *heartbeat = Some(BackgroundWorker::start(
            HeartbeatRunnable { probe },
            self.config.heartbeat_interval,
        ));
    }

    /// Asks the heartbeat to probe immediately instead of at the next tick.
    ///
    /// # Errors
    ///
    /// Fails when the heartbeat is not running.
    pub async fn probe_now(&self) -> anyhow::Result<()> {
        match self.heartbeat.lock().await.as_ref() {
            Some(worker) => worker.submit(HeartbeatCommand::ProbeNow).await,
            None => Err(anyhow::anyhow!("heartbeat is not running")),
        }
    }

    pub async fn stop(&self) {
        let worker = self.heartbeat.lock().await.take();
        if let Some(mut worker) = worker {
            worker.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }
}

impl Default for OnlineMonitor {
    fn default() -> Self {
        Self::new(OnlineMonitorConfig::default())
    }
}

/// Handle to an [`OnlineMonitor::on_change`] observer.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex as SyncMutex;

    use super::*;

    struct CountingProbe {
        count: AtomicUsize,
    }

    #[async_trait]
    impl HeartbeatProbe for CountingProbe {
        async fn probe(&self) -> Result<(), RemoteError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::EndpointNotFound {
                endpoint: "https://down.example/".to_string(),
            })
        }
    }

    #[test]
    fn starts_online_and_reports_transitions_only() {
        let monitor = OnlineMonitor::default();
        assert!(monitor.is_online());
        assert!(!monitor.set_status(OnlineStatus::Online));
        assert!(monitor.set_status(OnlineStatus::Offline));
        assert!(!monitor.set_status(OnlineStatus::Offline));
        assert_eq!(monitor.status(), OnlineStatus::Offline);
    }

    #[tokio::test]
    async fn watchers_see_transitions() {
        let monitor = OnlineMonitor::default();
        let mut rx = monitor.subscribe();
        monitor.record_unreachable();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), OnlineStatus::Offline);
    }

    #[tokio::test]
    async fn observers_run_until_unsubscribed() {
        let monitor = OnlineMonitor::default();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = monitor.on_change(move |status| sink.lock().push(status));

        monitor.record_unreachable();
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.record_success();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            *seen.lock(),
            vec![OnlineStatus::Offline, OnlineStatus::Online]
        );

        subscription.unsubscribe();
        tokio::task::yield_now().await;
        monitor.record_unreachable();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_and_survives_probe_failures() {
        let monitor = OnlineMonitor::default();
        let probe = Arc::new(CountingProbe {
            count: AtomicUsize::new(0),
        });
        monitor.start(probe.clone()).await;
        monitor.start(probe.clone()).await;
        assert!(monitor.is_running().await);

        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(probe.count.load(Ordering::SeqCst), 3);

        monitor.probe_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(probe.count.load(Ordering::SeqCst), 4);

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        assert!(monitor.probe_now().await.is_err());
    }
}
