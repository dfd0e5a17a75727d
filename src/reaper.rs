use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{Engine, SweepOutcome};
use crate::ports::{Scheduler, SchedulerError, SweepTask};

/// Background task that periodically abandons expired pending payments.
/// Catches payments whose scheduled sweep was lost, e.g. across a restart.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().sweep_interval);
    loop {
        interval.tick().await;
        match engine.sweep_expired_payments().await {
            Ok(0) => {}
            Ok(n) => info!("abandoned {n} expired pending payments"),
            Err(e) => warn!("pending-payment scan failed: {e}"),
        }
        engine.prune_idle_locks();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSweep {
    pub after: Duration,
    pub task: SweepTask,
}

/// In-process `Scheduler`: hands sweeps to [`run_scheduled_sweeps`] over a channel.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<ScheduledSweep>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledSweep>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
    async fn schedule_sweep(&self, after_minutes: i64, task: SweepTask) -> Result<(), SchedulerError> {
        let after = Duration::from_secs(after_minutes.max(0).unsigned_abs().saturating_mul(60));
        self.tx
            .send(ScheduledSweep { after, task })
            .map_err(|_| SchedulerError::Closed)
    }
}

/// Runs every scheduled sweep once its delay has passed. Returns when all
/// senders are gone.
pub async fn run_scheduled_sweeps(engine: Arc<Engine>, mut rx: mpsc::UnboundedReceiver<ScheduledSweep>) {
    while let Some(ScheduledSweep { after, task }) = rx.recv().await {
        let engine = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let payment_id = task.payment_id;
            match engine.sweep_pending_payment(payment_id).await {
                Ok(SweepOutcome::Abandoned) => info!("abandoned pending payment {payment_id}"),
                Ok(SweepOutcome::Skipped) => debug!("sweep skip {payment_id}"),
                Err(e) => warn!("sweep of {payment_id} failed: {e}"),
            }
        });
    }
}

/// Starts both sweepers for an engine wired by its host: the periodic scan
/// and the runner for sweeps handed over by [`ChannelScheduler`].
pub fn spawn_sweepers(
    engine: Arc<Engine>,
    sweeps: mpsc::UnboundedReceiver<ScheduledSweep>,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(run_sweeper(engine.clone())),
        tokio::spawn(run_scheduled_sweeps(engine, sweeps)),
    ]
}
