//! Two-phase glitch search.
//!
//! Phase 1 walks the power-rail grid. At each point it re-runs phase 2, a
//! full walk of the command-bus grid, until some command-bus point drives the
//! boot into the overflow; the serial payload is then validated and dumped.
//! Phase 1 keeps going after a candidate unless told to stop, since the
//! power-rail glitch is being characterised across offsets.

use std::collections::BTreeMap;
use std::time::Duration;

use faultline_hal::config::HardwareConfig;
use faultline_hal::{GlitchChannel, GlitchDriver, HalError, LineState, PacketBus, Rig, SerialPort};
use faultline_protocol::grid::{SweepGrid, SweepRange};
use faultline_protocol::types::{BootState, GlitchParameter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attempt::{AttemptPolicy, AttemptResult, GlitchAttempt};
use crate::cancel::CancelToken;
use crate::capture::{CapturePolicy, CapturedPayload, PayloadCapture};
use crate::error::SweepError;
use crate::event_loop::{run_until, Control, LoopOutcome, WaitPolicy};
use crate::store::PayloadStore;

/// Configuration for a sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Phase 1 grid (power-rail glitch).
    pub power_grid: SweepGrid,
    /// Phase 2 grid (command-bus glitch).
    pub command_grid: SweepGrid,
    pub attempt: AttemptPolicy,
    pub capture: CapturePolicy,
    /// Wait for first bus traffic after power-up.
    pub power_on: WaitPolicy,
    /// Phase 2 walks per phase-1 point before moving on. `None` retries
    /// until a command-bus glitch lands or the operator cancels.
    pub max_command_sweeps_per_point: Option<u32>,
    /// End phase 1 at the first validated payload.
    pub stop_at_first_success: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            power_grid: SweepGrid::new(SweepRange::new(20, 1000, 1), SweepRange::fixed(55)),
            command_grid: SweepGrid::new(SweepRange::fixed(40813), SweepRange::fixed(52)),
            attempt: AttemptPolicy::default(),
            capture: CapturePolicy::default(),
            power_on: WaitPolicy::new(600, Duration::from_millis(100)),
            max_command_sweeps_per_point: None,
            stop_at_first_success: false,
        }
    }
}

/// Running tallies over every attempt made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub total_reads: u64,
    pub total_restarts: u64,
    /// Complete phase-2 walks started.
    pub command_sweeps: u64,
    pub final_states: BTreeMap<BootState, u64>,
}

impl AttemptStats {
    pub fn record(&mut self, result: &AttemptResult) {
        self.attempts += 1;
        if result.succeeded() {
            self.successes += 1;
        }
        if result.timed_out {
            self.timeouts += 1;
        }
        self.total_reads += u64::from(result.read_count);
        self.total_restarts += u64::from(result.restart_count);
        *self.final_states.entry(result.final_state).or_insert(0) += 1;
    }

    /// Fraction of attempts that reached the overflow.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// What happened at one phase-1 point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointOutcome {
    /// A command-bus glitch landed and the serial prefix looked real.
    Candidate {
        command: GlitchParameter,
        location: Option<String>,
        payload: CapturedPayload,
    },
    /// A command-bus glitch landed but only the no-op pattern followed.
    NoPayload { command: GlitchParameter },
    /// The retry bound ran out without a command-bus hit.
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReport {
    pub parameter: GlitchParameter,
    /// Phase 2 walks run at this point.
    pub command_sweeps: u32,
    pub outcome: PointOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerSweepReport {
    pub points: Vec<PointReport>,
    /// Phase 1 ended at the first candidate.
    pub stopped_early: bool,
}

impl PowerSweepReport {
    pub fn candidates(&self) -> impl Iterator<Item = &PointReport> {
        self.points
            .iter()
            .filter(|p| matches!(p.outcome, PointOutcome::Candidate { .. }))
    }
}

/// Drives both sweep phases over an exclusively borrowed rig.
///
/// Attempts never overlap: each one returns its result before the next
/// starts.
pub struct SweepController<'a, D, B, S> {
    rig: &'a mut Rig<D, B, S>,
    hardware: &'a HardwareConfig,
    config: &'a SweepConfig,
    cancel: CancelToken,
    stats: AttemptStats,
    report: PowerSweepReport,
}

impl<'a, D: GlitchDriver, B: PacketBus, S: SerialPort> SweepController<'a, D, B, S> {
    pub fn new(
        rig: &'a mut Rig<D, B, S>,
        hardware: &'a HardwareConfig,
        config: &'a SweepConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            rig,
            hardware,
            config,
            cancel,
            stats: AttemptStats::default(),
            report: PowerSweepReport::default(),
        }
    }

    pub fn stats(&self) -> &AttemptStats {
        &self.stats
    }

    /// Points finished by the current or last power sweep. Still holds the
    /// partial report after a sweep ends in an error.
    pub fn report(&self) -> &PowerSweepReport {
        &self.report
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Bring the target up and leave it held in reset.
    ///
    /// Pulses reset, pulls the power line and waits for the first bus
    /// traffic before releasing power and re-asserting reset.
    pub fn power_on(&mut self) -> Result<(), SweepError> {
        info!("waiting for target to power on");
        let driver = &mut self.rig.driver;
        driver.set_reset(LineState::Asserted)?;
        driver.set_reset(LineState::HighImpedance)?;
        driver.set_power(LineState::Asserted)?;

        let bus = &mut self.rig.bus;
        let outcome = run_until(
            || -> Result<Option<()>, HalError> { Ok((bus.pending()? > 0).then_some(())) },
            |()| Control::StopSuccess(()),
            &self.config.power_on,
            &self.cancel,
        )?;
        match outcome {
            LoopOutcome::Succeeded(()) | LoopOutcome::Failed(()) => {}
            LoopOutcome::TimedOut => {
                return Err(SweepError::PowerOnTimeout {
                    polls: self.config.power_on.idle_polls,
                })
            }
            LoopOutcome::Cancelled => return Err(SweepError::Cancelled),
        }

        self.rig.driver.set_power(LineState::HighImpedance)?;
        self.rig.driver.set_reset(LineState::Asserted)?;
        info!("target powered on");
        Ok(())
    }

    /// Phase 2: walk the command-bus grid once. Returns the first attempt
    /// that reached the overflow, or `None` when the grid is exhausted.
    pub fn sweep_command_glitch(&mut self) -> Result<Option<AttemptResult>, SweepError> {
        let config = self.config;
        self.stats.command_sweeps += 1;

        for parameter in config.command_grid.points() {
            info!(
                offset = parameter.offset,
                width = parameter.width,
                "phase 2: trying"
            );
            let result = GlitchAttempt::new(
                &mut *self.rig,
                self.hardware,
                &config.attempt,
                &self.cancel,
            )
            .run(parameter)?;
            self.stats.record(&result);

            if result.succeeded() {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Phase 1: walk the power-rail grid, running phase 2 at every point
    /// and capturing the payload whenever a command-bus glitch lands.
    ///
    /// Without `max_command_sweeps_per_point` the phase 2 retry is bounded
    /// only by the cancel token.
    pub fn sweep_power_glitch<P: PayloadStore>(
        &mut self,
        store: &mut P,
    ) -> Result<PowerSweepReport, SweepError> {
        let config = self.config;
        self.report = PowerSweepReport::default();

        for point in config.power_grid.points() {
            if self.cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            info!(offset = point.offset, width = point.width, "phase 1: trying");

            self.rig.driver.set_reset(LineState::Asserted)?;
            self.rig.driver.arm(GlitchChannel::PowerRail, point)?;
            debug!("clearing serial buffer");
            self.rig.serial.clear()?;

            let (hit, command_sweeps) = self.retry_command_glitch()?;

            let outcome = match hit {
                None => {
                    warn!(
                        offset = point.offset,
                        width = point.width,
                        command_sweeps,
                        "no command-bus glitch landed, moving on"
                    );
                    PointOutcome::RetriesExhausted
                }
                Some(hit) => self.capture(point, hit.parameter, store)?,
            };

            let is_candidate = matches!(outcome, PointOutcome::Candidate { .. });
            self.report.points.push(PointReport {
                parameter: point,
                command_sweeps,
                outcome,
            });

            if is_candidate && config.stop_at_first_success {
                self.report.stopped_early = true;
                break;
            }
        }

        Ok(self.report.clone())
    }

    fn retry_command_glitch(&mut self) -> Result<(Option<AttemptResult>, u32), SweepError> {
        let mut sweeps = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            sweeps += 1;
            if let Some(result) = self.sweep_command_glitch()? {
                return Ok((Some(result), sweeps));
            }
            if self
                .config
                .max_command_sweeps_per_point
                .is_some_and(|max| sweeps >= max)
            {
                return Ok((None, sweeps));
            }
            info!(sweeps, "trying again to trigger payload");
        }
    }

    fn capture<P: PayloadStore>(
        &mut self,
        point: GlitchParameter,
        command: GlitchParameter,
        store: &mut P,
    ) -> Result<PointOutcome, SweepError> {
        let config = self.config;
        let rig = &mut *self.rig;
        let mut capture =
            PayloadCapture::new(&mut rig.bus, &mut rig.serial, &config.capture, &self.cancel);

        if !capture.wait_for_data()? {
            info!(offset = point.offset, width = point.width, "failed to see payload");
            return Ok(PointOutcome::NoPayload { command });
        }

        let payload = {
            let mut sink = store.open(point)?;
            capture.dump_payload(&mut sink)?
        };
        info!(
            offset = point.offset,
            width = point.width,
            bytes = payload.len(),
            complete = payload.complete,
            "candidate found"
        );
        Ok(PointOutcome::Candidate {
            command,
            location: store.location(point),
            payload,
        })
    }
}
