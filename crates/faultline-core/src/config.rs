//! Campaign configuration file.
//!
//! Every field has a default matching the rig this tool was built for, so an
//! empty JSON object is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use faultline_explore::attempt::AttemptPolicy;
use faultline_explore::capture::{CapturePolicy, CHECKSUM_START};
use faultline_explore::event_loop::WaitPolicy;
use faultline_explore::store::FileStore;
use faultline_explore::sweep::SweepConfig;
use faultline_hal::config::HardwareConfig;
use faultline_protocol::grid::{SweepGrid, SweepRange};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::campaign::CampaignError;
use crate::limits::CampaignLimits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub hardware: HardwareConfig,
    /// Phase 1 (power-rail) grid.
    pub power_grid: SweepGrid,
    /// Phase 2 (command-bus) grid.
    pub command_grid: SweepGrid,
    pub timing: TimingConfig,
    pub policy: PolicyConfig,
    pub limits: CampaignLimits,
    pub output: OutputConfig,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            power_grid: SweepGrid::new(SweepRange::new(20, 1000, 1), SweepRange::fixed(55)),
            command_grid: SweepGrid::new(SweepRange::fixed(40813), SweepRange::fixed(52)),
            timing: TimingConfig::default(),
            policy: PolicyConfig::default(),
            limits: CampaignLimits::default(),
            output: OutputConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Poll granularity and idle budgets. Budgets count empty polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub attempt_idle_polls: u32,
    pub payload_idle_polls: u32,
    pub power_on_idle_polls: u32,
    pub reset_hold_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            attempt_idle_polls: 10,
            payload_idle_polls: 100,
            power_on_idle_polls: 600,
            reset_hold_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_restarts: u32,
    pub stop_on_unexpected: bool,
    /// `None` keeps retrying phase 2 at a phase-1 point until it lands.
    pub max_command_sweeps_per_point: Option<u32>,
    pub stop_at_first_success: bool,
    pub payload_cap: usize,
    pub validate_prefix: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            stop_on_unexpected: false,
            max_command_sweeps_per_point: None,
            stop_at_first_success: false,
            payload_cap: 4096,
            validate_prefix: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Payload file. Overwritten by each candidate unless `per_point`.
    pub path: PathBuf,
    /// Suffix the payload file name with `-<offset>-<width>`.
    pub per_point: bool,
    /// Where to write the JSON campaign report, if anywhere.
    pub report: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dumprom.bin"),
            per_point: false,
            report: None,
        }
    }
}

impl CampaignConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CampaignError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| CampaignError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, CampaignError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CampaignError> {
        self.power_grid
            .check()
            .map_err(|e| invalid(format!("power_grid {e}")))?;
        self.command_grid
            .check()
            .map_err(|e| invalid(format!("command_grid {e}")))?;

        let timing = &self.timing;
        for (name, polls) in [
            ("attempt_idle_polls", timing.attempt_idle_polls),
            ("payload_idle_polls", timing.payload_idle_polls),
            ("power_on_idle_polls", timing.power_on_idle_polls),
        ] {
            if polls == 0 {
                return Err(invalid(format!("timing.{name} must be non-zero")));
            }
        }

        let policy = &self.policy;
        if policy.validate_prefix <= CHECKSUM_START {
            return Err(invalid(format!(
                "policy.validate_prefix must exceed {CHECKSUM_START}, got {}",
                policy.validate_prefix
            )));
        }
        if policy.payload_cap < policy.validate_prefix {
            return Err(invalid(format!(
                "policy.payload_cap {} is smaller than validate_prefix {}",
                policy.payload_cap, policy.validate_prefix
            )));
        }
        if policy.max_command_sweeps_per_point == Some(0) {
            return Err(invalid(
                "policy.max_command_sweeps_per_point must be non-zero".to_string(),
            ));
        }

        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, CampaignError> {
        self.log_level
            .parse()
            .map_err(|_| invalid(format!("unknown log_level '{}'", self.log_level)))
    }

    /// Install the stderr subscriber at `log_level`. Returns false when a
    /// subscriber was already installed.
    pub fn init_logging(&self) -> Result<bool, CampaignError> {
        Ok(crate::logging::init(self.level_filter()?))
    }

    /// Engine settings derived from this file.
    pub fn sweep_config(&self) -> SweepConfig {
        let interval = self.timing.poll_interval();
        SweepConfig {
            power_grid: self.power_grid,
            command_grid: self.command_grid,
            attempt: AttemptPolicy {
                wait: WaitPolicy::new(self.timing.attempt_idle_polls, interval),
                reset_hold: Duration::from_millis(self.timing.reset_hold_ms),
                max_restarts: self.policy.max_restarts,
                stop_on_unexpected: self.policy.stop_on_unexpected,
            },
            capture: CapturePolicy {
                wait: WaitPolicy::new(self.timing.payload_idle_polls, interval),
                payload_cap: self.policy.payload_cap,
                validate_prefix: self.policy.validate_prefix,
            },
            power_on: WaitPolicy::new(self.timing.power_on_idle_polls, interval),
            max_command_sweeps_per_point: self.policy.max_command_sweeps_per_point,
            stop_at_first_success: self.policy.stop_at_first_success,
        }
    }

    pub fn payload_store(&self) -> FileStore {
        FileStore::new(&self.output.path).per_point(self.output.per_point)
    }
}

fn invalid(details: String) -> CampaignError {
    CampaignError::InvalidConfig { details }
}
