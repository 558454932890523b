//! Periodic job runtime
//!
//! Each job runs on its own task. Ticks within a job are sequential and
//! missed ticks are skipped, so a slow tick never piles up work. A job may
//! also be woken early through a trigger channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Error type returned by a tick
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of periodic work
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run one tick. Errors are logged; the job keeps running.
    async fn tick(&self) -> Result<(), JobError>;
}

/// Handle to a spawned periodic job
#[derive(Debug)]
pub struct JobHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the job to stop and wait for an in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(job = self.name, error = %e, "Periodic job panicked");
        }
    }
}

async fn next_trigger(trigger: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match trigger {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Spawn `job` to tick every `period`, and additionally whenever a message
/// arrives on `trigger`.
pub fn spawn_periodic(
    job: Arc<dyn PeriodicJob>,
    period: Duration,
    mut trigger: Option<mpsc::Receiver<()>>,
) -> JobHandle {
    let name = job.name();
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(job = name, period_secs = period.as_secs_f64(), "Periodic job started");

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = job.tick().await {
                        tracing::error!(job = name, error = %e, "Periodic job tick failed");
                    }
                }
                Some(()) = next_trigger(&mut trigger) => {
                    if let Err(e) = job.tick().await {
                        tracing::error!(job = name, error = %e, "Triggered job tick failed");
                    }
                }
            }
        }

        tracing::info!(job = name, "Periodic job stopped");
    });

    JobHandle {
        name,
        stop_tx,
        task,
    }
}
