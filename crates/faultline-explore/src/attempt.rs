use std::thread;
use std::time::Duration;

use faultline_hal::config::HardwareConfig;
use faultline_hal::{GlitchChannel, GlitchDriver, HalError, LineState, PacketBus, Rig, SerialPort};
use faultline_protocol::machine::{advance, AttemptCounters};
use faultline_protocol::timing::{elapsed_ticks, ticks_to_millis};
use faultline_protocol::types::{BootState, GlitchParameter, ProtocolPacket};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::SweepError;
use crate::event_loop::{run_until, Control, LoopOutcome, WaitPolicy};

/// Knobs for a single command-bus glitch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptPolicy {
    /// Silence tolerated after reset release before giving up.
    pub wait: WaitPolicy,
    /// How long reset is held before stale packets are drained.
    pub reset_hold: Duration,
    /// Abandon the attempt once more than this many GO_IDLE_STATE requests
    /// have been seen.
    pub max_restarts: u32,
    /// Also stop as soon as an UNEXPECTED_* state is reached. When false the
    /// attempt keeps listening until the target goes quiet or restarts.
    pub stop_on_unexpected: bool,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::new(10, Duration::from_millis(100)),
            reset_hold: Duration::ZERO,
            max_restarts: 10,
            stop_on_unexpected: false,
        }
    }
}

/// Outcome of one glitch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub parameter: GlitchParameter,
    pub final_state: BootState,
    pub restart_count: u32,
    pub read_count: u32,
    /// Packets classified after reset release.
    pub packets: u32,
    /// The target went quiet before reaching a stopping state.
    pub timed_out: bool,
}

impl AttemptResult {
    /// The glitch produced the overflow we are looking for.
    pub fn succeeded(&self) -> bool {
        self.final_state == BootState::Overflowed
    }
}

/// One trial: arm, reset, drain, release, then classify bus traffic until
/// the boot reaches a stopping state or the target falls silent.
///
/// Borrows the rig exclusively for the duration of the attempt.
pub struct GlitchAttempt<'a, D, B, S> {
    rig: &'a mut Rig<D, B, S>,
    hardware: &'a HardwareConfig,
    policy: &'a AttemptPolicy,
    cancel: &'a CancelToken,
}

impl<'a, D: GlitchDriver, B: PacketBus, S: SerialPort> GlitchAttempt<'a, D, B, S> {
    pub fn new(
        rig: &'a mut Rig<D, B, S>,
        hardware: &'a HardwareConfig,
        policy: &'a AttemptPolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            rig,
            hardware,
            policy,
            cancel,
        }
    }

    pub fn run(self, parameter: GlitchParameter) -> Result<AttemptResult, SweepError> {
        if self.cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        self.rig.driver.arm(GlitchChannel::CommandBus, parameter)?;

        self.rig.driver.set_reset(LineState::Asserted)?;
        if !self.policy.reset_hold.is_zero() {
            thread::sleep(self.policy.reset_hold);
        }
        let baseline = self.rig.drain_packets()?.map_or(0, |p| p.seq);

        self.rig.driver.set_reset(LineState::HighImpedance)?;

        let mut state = BootState::BootStarted;
        let mut counters = AttemptCounters::new();
        let mut last_seq = baseline;
        let mut packets = 0u32;
        let max_restarts = self.policy.max_restarts;
        let stop_on_unexpected = self.policy.stop_on_unexpected;
        let prescale = self.hardware.counter_prescale;
        let sysclk_hz = self.hardware.sysclk_hz;

        let bus = &mut self.rig.bus;
        let outcome = run_until(
            || -> Result<Option<ProtocolPacket>, HalError> {
                if bus.pending()? > 0 {
                    bus.read_next().map(Some)
                } else {
                    Ok(None)
                }
            },
            |packet| {
                let ticks = elapsed_ticks(last_seq, packet.seq);
                last_seq = packet.seq;
                packets += 1;
                trace!(
                    "[{:10.5}ms] {}",
                    ticks_to_millis(ticks, prescale, sysclk_hz),
                    packet
                );

                counters.observe(&packet);
                state = advance(state, &packet);

                if state == BootState::Overflowed {
                    Control::StopSuccess(state)
                } else if state == BootState::Restarted || counters.restarts > max_restarts {
                    Control::StopFailure(state)
                } else if stop_on_unexpected && state.is_unexpected() {
                    Control::StopFailure(state)
                } else {
                    Control::Continue
                }
            },
            &self.policy.wait,
            self.cancel,
        )?;

        let timed_out = match outcome {
            LoopOutcome::Succeeded(_) | LoopOutcome::Failed(_) => false,
            LoopOutcome::TimedOut => true,
            LoopOutcome::Cancelled => return Err(SweepError::Cancelled),
        };

        let result = AttemptResult {
            parameter,
            final_state: state,
            restart_count: counters.restarts,
            read_count: counters.reads,
            packets,
            timed_out,
        };
        debug!(
            offset = parameter.offset,
            width = parameter.width,
            state = %result.final_state,
            reads = result.read_count,
            restarts = result.restart_count,
            timed_out,
            "attempt finished"
        );
        Ok(result)
    }
}
