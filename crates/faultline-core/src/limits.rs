//! Campaign limits and graceful stop.
//!
//! A campaign may be capped on wall-clock time. When the cap is hit the
//! sweep is cancelled at its next poll and the campaign reports what it
//! found so far rather than failing.

use std::time::{Duration, Instant};

use faultline_explore::cancel::CancelToken;
use serde::{Deserialize, Serialize};

/// Limits for a single campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignLimits {
    /// Maximum wall-clock seconds before forced stop. `None` runs until the
    /// grid is exhausted or the operator cancels.
    pub max_wall_secs: Option<u64>,
}

impl CampaignLimits {
    pub fn wall_time(&self) -> Option<Duration> {
        self.max_wall_secs.map(Duration::from_secs)
    }
}

/// Reason a campaign stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every phase-1 point was visited.
    Complete,
    /// Stopped at the first validated payload.
    FirstSuccess,
    /// Wall-clock limit exceeded.
    WallTimeExceeded,
    /// Operator-requested abort.
    UserAborted,
}

/// Tracks a running campaign against its limits.
#[derive(Debug)]
pub struct LimitChecker {
    limits: CampaignLimits,
    start_time: Instant,
}

impl LimitChecker {
    pub fn new(limits: CampaignLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
        }
    }

    /// Token for the sweep: shares `operator`'s flag and carries the
    /// wall-clock deadline, if any.
    pub fn cancel_token(&self, operator: &CancelToken) -> CancelToken {
        match self.limits.wall_time() {
            Some(wall) => operator.clone().with_deadline(self.start_time + wall),
            None => operator.clone(),
        }
    }

    pub fn wall_time_exceeded(&self) -> bool {
        self.limits
            .wall_time()
            .is_some_and(|wall| self.start_time.elapsed() >= wall)
    }

    /// Classify a cancellation. The operator flag wins over the deadline.
    pub fn cancel_reason(&self, operator: &CancelToken) -> StopReason {
        if !operator.is_cancelled() && self.wall_time_exceeded() {
            StopReason::WallTimeExceeded
        } else {
            StopReason::UserAborted
        }
    }

    /// Seconds since the checker was created.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}
