use super::CleanupService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs cleanup sweeps on the configured interval in one background task.
///
/// Sweeps never overlap. `stop` waits for an in-flight sweep to finish.
pub struct CleanupScheduler {
    service: Arc<CleanupService>,
    worker: Mutex<Option<Worker>>,
}

impl CleanupScheduler {
    pub fn new(service: Arc<CleanupService>) -> Self {
        Self {
            service,
            worker: Mutex::new(None),
        }
    }

    /// Start sweeping: one sweep right away, then one per interval.
    ///
    /// Does nothing when cleanup is disabled or the scheduler already runs.
    pub async fn start(&self) {
        let config = self.service.config();
        if !config.enabled {
            tracing::info!("Orphan cleanup disabled, scheduler not started");
            return;
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::debug!("Cleanup scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::run(self.service.clone(), shutdown_rx));

        tracing::info!(
            interval_secs = config.interval.as_secs(),
            min_age_secs = config.min_age.as_secs(),
            dry_run = config.dry_run,
            "Cleanup scheduler started"
        );

        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
    }

    /// Signal the background task and wait for it to exit. No-op when stopped.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        let _ = worker.shutdown_tx.send(()).await;
        if let Err(e) = worker.handle.await {
            tracing::error!(error = %e, "Cleanup scheduler task ended abnormally");
        }

        tracing::info!("Cleanup scheduler stopped");
    }

    pub async fn state(&self) -> SchedulerState {
        if self.worker.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    async fn run(service: Arc<CleanupService>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(service.config().interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = service.run_cleanup().await {
                        tracing::error!(error = %e, "Orphan cleanup sweep failed");
                    }
                }
            }
        }
    }
}
