use crate::orchestrator::PipelineOrchestrator;
use crate::types::{PipelineError, Result, RunReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Thin driver over the orchestrator: one-shot and fixed-interval runs.
pub struct Scheduler {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Trigger exactly one cycle.
    pub async fn run_once(&self) -> Result<RunReport> {
        self.orchestrator.run_cycle().await
    }

    /// Trigger a cycle every `every`, indefinitely. A tick that finds a
    /// cycle still running is skipped, not queued.
    pub async fn run_continuous(&self, every: Duration) -> Result<()> {
        info!("Scheduling a cycle every {:?}", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.orchestrator.run_cycle().await {
                Ok(report) => {
                    info!(
                        "Cycle {} reached {:?}: {} processed, {} failed, digest entries {}",
                        report.cycle_id,
                        report.stage_reached,
                        report.processed,
                        report.failed,
                        report.digest_entries
                    );
                    if let Some(fatal) = &report.fatal {
                        error!("Cycle {} recorded fatal error: {}", report.cycle_id, fatal);
                    }
                }
                Err(PipelineError::AlreadyRunning) => {
                    warn!("Previous cycle still running; skipping this tick");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
