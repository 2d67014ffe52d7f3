//! Background worker that drives sync passes.
//!
//! The worker owns the only long-lived loop in the engine. It wakes up on
//! explicit resync requests, on every offline → online transition of the
//! connectivity monitor, and optionally on a fixed interval. Requests that
//! arrive while a pass is running are merged into a single follow-up pass.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Commands understood by the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerCommand {
    /// Run a pass.
    Resync,
    /// Stop the loop.
    Shutdown,
}

pub(crate) struct SyncWorker {
    engine: SyncEngine,
    commands: mpsc::Receiver<WorkerCommand>,
    connectivity: watch::Receiver<bool>,
    interval: Option<Duration>,
}

impl SyncWorker {
    pub(crate) fn new(engine: SyncEngine, commands: mpsc::Receiver<WorkerCommand>) -> Self {
        let connectivity = engine.monitor().subscribe();
        let interval = engine.config().sync_interval;
        Self {
            engine,
            commands,
            connectivity,
            interval,
        }
    }

    async fn run(mut self) {
        info!(interval = ?self.interval, "sync worker started");

        if *self.connectivity.borrow_and_update() {
            self.pass("startup").await;
        }

        let mut ticker = self.interval.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Resync) => self.pass("requested").await,
                    Some(WorkerCommand::Shutdown) | None => break,
                },
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // The monitor only notifies on a real change, so reading
                    // `true` here means the flag went offline and back online,
                    // possibly several times since the last wake-up.
                    if *self.connectivity.borrow_and_update() {
                        self.pass("reconnected").await;
                    }
                },
                _ = tick(&mut ticker) => {
                    if self.engine.is_online_mode() {
                        self.pass("interval").await;
                    }
                },
            }
        }

        info!("sync worker stopped");
    }

    async fn pass(&self, trigger: &'static str) {
        debug!(trigger, "sync pass triggered");
        if let Err(e) = self.engine.sync_after_current().await {
            error!(trigger, error = %e, "sync pass failed");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to a running sync worker.
///
/// Dropping the handle detaches the worker; it then runs until the tokio
/// runtime shuts down. Call [`WorkerHandle::shutdown`] to stop it cleanly.
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(worker: SyncWorker, commands: mpsc::Sender<WorkerCommand>) -> Self {
        let task = tokio::spawn(worker.run());
        Self { commands, task }
    }

    /// Asks the worker for a pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WorkerStopped`] if the worker has exited.
    pub fn resync(&self) -> SyncResult<()> {
        match self.commands.try_send(WorkerCommand::Resync) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::WorkerStopped),
        }
    }

    /// Returns true if the worker loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the worker after any running pass and waits for it to exit.
    pub async fn shutdown(self) {
        if self.commands.send(WorkerCommand::Shutdown).await.is_err() {
            debug!("sync worker already stopped");
        }
        if let Err(e) = self.task.await {
            error!(error = %e, "sync worker panicked");
        }
    }
}
