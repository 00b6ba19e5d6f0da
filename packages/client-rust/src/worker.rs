//! Periodic background work for the client runtime.
//!
//! [`BackgroundWorker`] drives a [`BackgroundRunnable`] on a tokio task: it
//! runs every submitted command, calls `on_tick` at a fixed interval and hands
//! control to `shutdown` once stopped. Heartbeat probing and clock resync are
//! both built on it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Bound of the command queue; `submit` waits while it is full.
const COMMAND_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// BackgroundRunnable
// ---------------------------------------------------------------------------

/// Work driven by a [`BackgroundWorker`].
///
/// Implementors decide what an on-demand command does, what happens on each
/// tick and how to clean up once the worker stops.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// On-demand command type (e.g. "check now").
    type Command: Send + 'static;

    /// Handles one submitted command.
    async fn run(&mut self, command: Self::Command);

    /// Called once per tick interval. The first tick fires one full interval
    /// after start.
    async fn on_tick(&mut self) {}

    /// Called once after the loop exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background task.
///
/// The spawned loop:
/// 1. runs each command received on the queue
/// 2. calls `on_tick` every tick interval, delaying missed ticks
/// 3. calls `shutdown` once stopped or once every handle to the queue is gone
///
/// Dropping the handle aborts the loop without calling `shutdown`.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    commands: Option<mpsc::Sender<R::Command>>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. Must be called inside a tokio runtime.
    pub fn start(mut runnable: R, tick: Duration) -> Self {
        let (commands, mut rx) = mpsc::channel::<R::Command>(COMMAND_CAPACITY);
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(command) => runnable.run(command).await,
                        None => break,
                    },
                    _ = interval.tick() => runnable.on_tick().await,
                    _ = &mut stop_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            commands: Some(commands),
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Queues a command for the worker.
    ///
    /// # Errors
    ///
    /// Fails when the worker has been stopped.
    pub async fn submit(&self, command: R::Command) -> anyhow::Result<()> {
        match &self.commands {
            Some(tx) => tx
                .send(command)
                .await
                .map_err(|_| anyhow::anyhow!("background worker has exited")),
            None => Err(anyhow::anyhow!("background worker is stopped")),
        }
    }

    /// True until the loop has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the loop to exit and waits for `shutdown` to complete.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
