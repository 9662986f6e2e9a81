use std::path::PathBuf;

use faultline_explore::cancel::CancelToken;
use faultline_explore::store::PayloadStore;
use faultline_explore::sweep::{SweepConfig, SweepController};
use faultline_explore::SweepError;
use faultline_hal::{GlitchDriver, PacketBus, Rig, SerialPort};
use tracing::{info, warn};

use crate::analytics::{CampaignAnalytics, CampaignPhase};
use crate::config::CampaignConfig;
use crate::limits::{LimitChecker, StopReason};

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Failed to read config {path}: {source}")]
    Config {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sweep failed: {0}")]
    Sweep(#[from] SweepError),

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },
}

/// One glitch campaign over an exclusively owned rig.
pub struct Campaign<D, B, S> {
    config: CampaignConfig,
    sweep: SweepConfig,
    rig: Rig<D, B, S>,
    operator: CancelToken,
}

impl<D: GlitchDriver, B: PacketBus, S: SerialPort> Campaign<D, B, S> {
    /// Validate `config`, install logging at its level and run the driver's
    /// one-time hardware setup.
    pub fn new(config: CampaignConfig, mut rig: Rig<D, B, S>) -> Result<Self, CampaignError> {
        config.validate()?;
        config.init_logging()?;
        rig.driver
            .configure(&config.hardware)
            .map_err(SweepError::from)?;

        let sweep = config.sweep_config();
        info!(
            power_points = sweep.power_grid.len(),
            command_points = sweep.command_grid.len(),
            "campaign configured"
        );
        Ok(Self {
            config,
            sweep,
            rig,
            operator: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Handle that stops the campaign at its next poll. Safe to hand to a
    /// signal handler.
    pub fn cancel_handle(&self) -> CancelToken {
        self.operator.clone()
    }

    pub fn rig(&self) -> &Rig<D, B, S> {
        &self.rig
    }

    /// Run with payloads written where the configuration says.
    pub fn run(&mut self) -> Result<CampaignAnalytics, CampaignError> {
        let mut store = self.config.payload_store();
        self.run_with_store(&mut store)
    }

    /// Power the target on, run the two-phase sweep and report.
    ///
    /// Hitting the wall-clock limit or an operator cancel is not an error:
    /// the report covers every point finished before the stop. Hardware and
    /// capture failures abort the campaign.
    pub fn run_with_store<P: PayloadStore>(
        &mut self,
        store: &mut P,
    ) -> Result<CampaignAnalytics, CampaignError> {
        let checker = LimitChecker::new(self.config.limits.clone());
        let cancel = checker.cancel_token(&self.operator);
        let mut analytics = CampaignAnalytics::new();

        let mut controller =
            SweepController::new(&mut self.rig, &self.config.hardware, &self.sweep, cancel);

        analytics.phase = CampaignPhase::PoweringOn;
        let outcome = match controller.power_on() {
            Ok(()) => {
                analytics.phase = CampaignPhase::Sweeping;
                controller.sweep_power_glitch(store)
            }
            Err(e) => Err(e),
        };

        analytics.record_stats(controller.stats());
        analytics.record_report(controller.report());

        match outcome {
            Ok(report) if report.stopped_early => analytics.finish(StopReason::FirstSuccess),
            Ok(_) => analytics.finish(StopReason::Complete),
            Err(SweepError::Cancelled) => {
                let reason = checker.cancel_reason(&self.operator);
                warn!(?reason, "campaign stopped before the grid was exhausted");
                analytics.finish(reason);
            }
            Err(e) => return Err(e.into()),
        }
        analytics.set_elapsed(checker.elapsed_secs());

        let summary = analytics.summary();
        info!(
            phase = ?summary.phase,
            points = summary.points_swept,
            candidates = summary.candidates,
            attempts = summary.attempts,
            success_rate = summary.success_rate,
            elapsed_secs = summary.elapsed_secs,
            "campaign finished"
        );

        if let Some(path) = &self.config.output.report {
            analytics.write_json(path)?;
            info!(path = %path.display(), "report written");
        }
        Ok(analytics)
    }
}
