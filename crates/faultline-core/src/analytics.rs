//! Campaign analytics.
//!
//! Folds the attempt statistics and the per-point sweep report into one
//! serialisable record, written as JSON when the configuration asks for it.

use std::fs;
use std::path::Path;

use faultline_explore::sweep::{AttemptStats, PointOutcome, PowerSweepReport};
use faultline_protocol::types::GlitchParameter;
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignError;
use crate::limits::StopReason;

/// A phase-1 point that produced a validated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub power: GlitchParameter,
    pub command: GlitchParameter,
    pub bytes: usize,
    /// Dump reached the cap.
    pub complete: bool,
    pub location: Option<String>,
}

/// Campaign lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Configured,
    PoweringOn,
    Sweeping,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignAnalytics {
    pub phase: CampaignPhase,
    pub stop_reason: Option<StopReason>,
    /// Phase-1 points finished.
    pub points_swept: u64,
    pub no_payload_points: u64,
    pub exhausted_points: u64,
    pub candidates: Vec<CandidateRecord>,
    pub stats: AttemptStats,
    /// Wall-clock elapsed seconds.
    pub elapsed_secs: f64,
}

impl CampaignAnalytics {
    pub fn new() -> Self {
        Self {
            phase: CampaignPhase::Configured,
            stop_reason: None,
            points_swept: 0,
            no_payload_points: 0,
            exhausted_points: 0,
            candidates: Vec::new(),
            stats: AttemptStats::default(),
            elapsed_secs: 0.0,
        }
    }

    /// Replace the per-point tallies with those of `report`.
    pub fn record_report(&mut self, report: &PowerSweepReport) {
        self.points_swept = report.points.len() as u64;
        self.no_payload_points = 0;
        self.exhausted_points = 0;
        self.candidates.clear();

        for point in &report.points {
            match &point.outcome {
                PointOutcome::Candidate {
                    command,
                    location,
                    payload,
                } => self.candidates.push(CandidateRecord {
                    power: point.parameter,
                    command: *command,
                    bytes: payload.len(),
                    complete: payload.complete,
                    location: location.clone(),
                }),
                PointOutcome::NoPayload { .. } => self.no_payload_points += 1,
                PointOutcome::RetriesExhausted => self.exhausted_points += 1,
            }
        }
    }

    pub fn record_stats(&mut self, stats: &AttemptStats) {
        self.stats = stats.clone();
    }

    /// Mark the campaign finished.
    pub fn finish(&mut self, reason: StopReason) {
        self.phase = match reason {
            StopReason::Complete | StopReason::FirstSuccess => CampaignPhase::Complete,
            StopReason::WallTimeExceeded | StopReason::UserAborted => CampaignPhase::Aborted,
        };
        self.stop_reason = Some(reason);
    }

    pub fn set_elapsed(&mut self, secs: f64) {
        self.elapsed_secs = secs;
    }

    /// Attempts per second of wall-clock time.
    pub fn attempt_rate(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            self.stats.attempts as f64 / self.elapsed_secs
        }
    }

    pub fn summary(&self) -> AnalyticsSummary {
        AnalyticsSummary {
            phase: self.phase,
            stop_reason: self.stop_reason,
            points_swept: self.points_swept,
            candidates: self.candidates.len() as u64,
            attempts: self.stats.attempts,
            success_rate: self.stats.success_rate(),
            attempt_rate: self.attempt_rate(),
            elapsed_secs: self.elapsed_secs,
        }
    }

    pub fn to_json(&self) -> Result<String, CampaignError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), CampaignError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl Default for CampaignAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact analytics summary for the end-of-run log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub phase: CampaignPhase,
    pub stop_reason: Option<StopReason>,
    pub points_swept: u64,
    pub candidates: u64,
    pub attempts: u64,
    pub success_rate: f64,
    pub attempt_rate: f64,
    pub elapsed_secs: f64,
}
