//! Remote-consistent time.
//!
//! [`ClockSyncProvider`] keeps an offset between the local clock and a remote
//! time service. The offset is refreshed at most once per resync period,
//! persisted to an offline cache on success, and recovered from that cache
//! when no offset has been established yet and the service is unreachable.

pub mod offline;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use parking_lot::Mutex;
use relay_core::clock::{duration_ms, millis_to_utc};
use relay_core::{ClockSource, RemoteError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::RemoteClient;
use crate::context::CallContext;
use crate::worker::{BackgroundRunnable, BackgroundWorker};

pub use offline::{FileOfflineCache, MemoryOfflineCache, NullOfflineCache, OfflineCache};

/// Contract name of the time service.
pub const TIME_SERVICE_CONTRACT: &str = "Relay.TimeService";
/// Operation returning the service's current UTC time.
pub const GET_TIME_OPERATION: &str = "GetTime";

/// Source of authoritative time.
#[async_trait]
pub trait TimeService: Send + Sync {
    async fn get_time(&self) -> Result<DateTime<Utc>, RemoteError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTimeResponse {
    pub time: DateTime<Utc>,
}

/// [`TimeService`] over a [`RemoteClient`] for the time service contract.
pub struct RemoteTimeService {
    client: Arc<RemoteClient>,
    context: CallContext,
}

impl RemoteTimeService {
    #[must_use]
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            context: CallContext::new(),
        }
    }
}

#[async_trait]
impl TimeService for RemoteTimeService {
    async fn get_time(&self) -> Result<DateTime<Utc>, RemoteError> {
        let response: GetTimeResponse = self
            .client
            .invoke(&self.context, GET_TIME_OPERATION, &())
            .await?;
        Ok(response.time)
    }
}

/// Which representation [`ClockSyncProvider::current_time`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Utc,
    Local,
}

#[derive(Debug, Clone)]
pub struct ClockSyncConfig {
    pub resync_period: Duration,
    /// Age of the last successful resync beyond which failures are warned about.
    pub max_staleness: Duration,
    pub offline_cache_key: String,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(60),
            max_staleness: Duration::from_secs(5 * 60),
            offline_cache_key: "relay.clock.offset".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    /// Local minus remote, in milliseconds.
    offset_ms: Option<i64>,
    last_success_ms: Option<u64>,
    last_attempt_ms: Option<u64>,
    /// Set when a failed resync finds the last success older than
    /// `max_staleness`; cleared by the next success.
    stale: bool,
}

/// Cached local-to-remote clock offset with lazy and background resync.
pub struct ClockSyncProvider {
    service: Arc<dyn TimeService>,
    offline: Arc<dyn OfflineCache>,
    clock: Arc<dyn ClockSource>,
    config: ClockSyncConfig,
    state: Mutex<SyncState>,
    resync_gate: tokio::sync::Mutex<()>,
    worker: tokio::sync::Mutex<Option<BackgroundWorker<ClockResyncRunnable>>>,
}

impl ClockSyncProvider {
    #[must_use]
    pub fn new(
        service: Arc<dyn TimeService>,
        offline: Arc<dyn OfflineCache>,
        clock: Arc<dyn ClockSource>,
        config: ClockSyncConfig,
    ) -> Self {
        Self {
            service,
            offline,
            clock,
            config,
            state: Mutex::new(SyncState::default()),
            resync_gate: tokio::sync::Mutex::new(()),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Local-minus-remote offset, if one has been established or recovered.
    #[must_use]
    pub fn offset_ms(&self) -> Option<i64> {
        self.state.lock().offset_ms
    }

    #[must_use]
    pub fn last_successful_resync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_success_ms.map(millis_to_utc)
    }

    #[must_use]
    pub fn last_attempted_resync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_attempt_ms.map(millis_to_utc)
    }

    /// True once resyncs have kept failing past `max_staleness` since the
    /// last success. The cached offset is still served.
    #[must_use]
    pub fn is_offset_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Remote-consistent current time: the local clock minus the offset.
    /// Resyncs first when the period has elapsed; a failed resync still
    /// yields a best-effort timestamp.
    pub async fn current_time(&self, kind: TimeKind) -> DateTime<FixedOffset> {
        let utc = self.current_utc().await;
        match kind {
            TimeKind::Utc => utc.fixed_offset(),
            TimeKind::Local => utc.with_timezone(&Local).fixed_offset(),
        }
    }

    pub async fn current_utc(&self) -> DateTime<Utc> {
        if let Err(err) = self.resync_if_due().await {
            debug!(error = %err, "clock resync failed; using cached offset");
        }
        self.adjusted_now()
    }

    fn adjusted_now(&self) -> DateTime<Utc> {
        let local = i64::try_from(self.clock.now_ms()).unwrap_or(i64::MAX);
        let offset = self.offset_ms().unwrap_or(0);
        millis_to_utc(u64::try_from(local.saturating_sub(offset)).unwrap_or(0))
    }

    fn is_due(&self, now_ms: u64) -> bool {
        self.state
            .lock()
            .last_attempt_ms
            .map_or(true, |last| {
                now_ms.saturating_sub(last) >= duration_ms(self.config.resync_period)
            })
    }

    /// Resyncs if the period has elapsed and no other resync is in flight.
    /// Returns whether a resync succeeded.
    ///
    /// # Errors
    ///
    /// Returns the time service error of a failed attempt.
    pub async fn resync_if_due(&self) -> Result<bool, RemoteError> {
        let Ok(_gate) = self.resync_gate.try_lock() else {
            return Ok(false);
        };
        if !self.is_due(self.clock.now_ms()) {
            return Ok(false);
        }
        self.attempt().await.map(|()| true)
    }

    /// Resyncs now, regardless of the period.
    ///
    /// # Errors
    ///
    /// Returns the time service error.
    pub async fn resync(&self) -> Result<(), RemoteError> {
        let _gate = self.resync_gate.lock().await;
        self.attempt().await
    }

    async fn attempt(&self) -> Result<(), RemoteError> {
        let before = self.clock.now_ms();
        self.state.lock().last_attempt_ms = Some(before);

        match self.service.get_time().await {
            Ok(remote) => {
                let after = self.clock.now_ms();
                let midpoint = before + after.saturating_sub(before) / 2;
                let offset = i64::try_from(midpoint).unwrap_or(i64::MAX) - remote.timestamp_millis();
                {
                    let mut state = self.state.lock();
                    state.offset_ms = Some(offset);
                    state.last_success_ms = Some(after);
                    state.stale = false;
                }
                debug!(offset_ms = offset, "clock offset resynchronised");
                if let Err(err) = self
                    .offline
                    .put(&self.config.offline_cache_key, serde_json::json!(offset))
                    .await
                {
                    warn!(error = %err, "persisting clock offset failed");
                }
                Ok(())
            }
            Err(err) => {
                self.on_failure(before).await;
                Err(err)
            }
        }
    }

    async fn on_failure(&self, now_ms: u64) {
        let (last_success, has_offset) = {
            let state = self.state.lock();
            (state.last_success_ms, state.offset_ms.is_some())
        };
        if let Some(last) = last_success {
            let age = now_ms.saturating_sub(last);
            if age > duration_ms(self.config.max_staleness) {
                self.state.lock().stale = true;
                warn!(age_ms = age, "clock offset is stale; time service unreachable");
            }
        }
        if has_offset {
            return;
        }
        match self.offline.get(&self.config.offline_cache_key).await {
            Ok(Some(value)) => match value.as_i64() {
                Some(offset) => {
                    let mut state = self.state.lock();
                    if state.offset_ms.is_none() {
                        state.offset_ms = Some(offset);
                        info!(offset_ms = offset, "recovered clock offset from offline cache");
                    }
                }
                None => warn!(%value, "ignoring malformed clock offset in offline cache"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "reading clock offset from offline cache failed"),
        }
    }

    /// Resyncs on a background tick every resync period, alongside the lazy
    /// resync in [`current_time`](Self::current_time). A no-op if already
    /// running.
    pub async fn start_background(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(BackgroundWorker::is_running) {
            return;
        }
        *worker = Some(BackgroundWorker::start(
            ClockResyncRunnable {
                provider: Arc::downgrade(self),
            },
            self.config.resync_period,
        ));
    }

    pub async fn stop_background(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(mut worker) = worker {
            worker.stop().await;
        }
    }
}

struct ClockResyncRunnable {
    provider: Weak<ClockSyncProvider>,
}

#[async_trait]
impl BackgroundRunnable for ClockResyncRunnable {
    type Command = ();

    async fn run(&mut self, (): ()) {
        self.on_tick().await;
    }

    async fn on_tick(&mut self) {
        let Some(provider) = self.provider.upgrade() else {
            return;
        };
        if let Err(err) = provider.resync_if_due().await {
            debug!(error = %err, "background clock resync failed");
        }
    }
}
