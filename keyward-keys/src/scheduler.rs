//! Tick scheduler for the rotation engine

use crate::engine::{RotationEngine, TickOutcome};
use crate::settings::SchedulerSettings;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counters for a scheduler run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub ticks: u64,
    pub rotations: u64,
    pub failures: u64,
}

impl SchedulerSummary {
    fn record(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Rotated(_) => self.rotations += 1,
            TickOutcome::Failed(_) => self.failures += 1,
            TickOutcome::NotDue { .. } => {}
        }
    }
}

/// Runs engine ticks: once at startup, then on a fixed cadence until cancelled
///
/// Ticks never overlap. A cycle that outlasts the check interval makes the
/// scheduler skip the missed ticks rather than queue them.
pub struct Scheduler {
    engine: RotationEngine,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(engine: RotationEngine, settings: SchedulerSettings) -> Self {
        Self { engine, settings }
    }

    /// Run until `shutdown` is cancelled, or after the initial tick when periodic rotation is off
    ///
    /// Cancellation is only observed between ticks, so an in-flight cycle
    /// always completes.
    pub async fn run(mut self, shutdown: CancellationToken) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();

        info!(key_name = %self.engine.settings().key_name, "Performing initial key rotation check");
        let outcome = self.engine.tick().await;
        summary.record(&outcome);

        if !self.settings.periodic_enabled {
            info!("Periodic rotation is disabled, exiting after the initial check");
            return summary;
        }

        let period = self.settings.check_interval;
        info!(
            interval_hours = self.engine.settings().interval_hours,
            check_interval_secs = period.as_secs(),
            "Scheduling periodic key rotation"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(ticks = summary.ticks, "Rotation scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.engine.tick().await;
                    summary.record(&outcome);
                }
            }
        }

        summary
    }
}
