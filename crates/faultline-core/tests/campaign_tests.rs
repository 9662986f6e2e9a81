use std::fs;
use std::path::PathBuf;

use faultline_core::analytics::CampaignPhase;
use faultline_core::campaign::{Campaign, CampaignError};
use faultline_core::config::CampaignConfig;
use faultline_core::limits::StopReason;
use faultline_explore::store::DiscardStore;
use faultline_explore::SweepError;
use faultline_hal::sim::{ArmedGlitches, BootScript, DriverCall, SimulatedTarget};
use faultline_hal::HalError;
use faultline_protocol::types::{BootState, Command, GlitchParameter};

fn fast_config() -> CampaignConfig {
    CampaignConfig::from_json(include_str!("fixtures/fast_campaign.json")).unwrap()
}

fn payload() -> Vec<u8> {
    (1..=64).collect()
}

fn boot(overflow: bool) -> BootScript {
    let script = BootScript::new()
        .request(Command::GoIdleState, 0)
        .request(Command::ReadSingleBlock, 0)
        .request(Command::SendStatus, 0)
        .request(Command::ReadSingleBlock, 0x8000);
    if overflow {
        script.request(Command::ReadSingleBlock, 0x80E1)
    } else {
        script
    }
}

/// Command-bus offset 102 lands at power offsets 20 and 21; only 21 dumps
/// a real payload.
fn responder(armed: &ArmedGlitches) -> BootScript {
    let command_hit = armed.command_bus.is_some_and(|p| p.offset == 102);
    match (command_hit, armed.power_rail.map(|p| p.offset)) {
        (true, Some(20)) => boot(true).serial(&[0u8; 16]),
        (true, Some(21)) => boot(true).serial(&payload()),
        _ => boot(false),
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("faultline-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_new_configures_hardware_once() {
    let target = SimulatedTarget::new(responder);
    let campaign = Campaign::new(fast_config(), target.rig()).unwrap();

    assert_eq!(target.calls(), vec![DriverCall::Configure]);
    assert_eq!(campaign.config().log_level, "debug");
}

#[test]
fn test_invalid_config_never_touches_hardware() {
    let target = SimulatedTarget::new(responder);
    let mut config = fast_config();
    config.policy.validate_prefix = 2;

    let result = Campaign::new(config, target.rig());
    assert!(matches!(result, Err(CampaignError::InvalidConfig { .. })));
    assert!(target.calls().is_empty());
}

#[test]
fn test_configure_failure_is_fatal() {
    let target = SimulatedTarget::new(responder);
    target.fail_on("configure");

    let result = Campaign::new(fast_config(), target.rig());
    assert!(matches!(
        result,
        Err(CampaignError::Sweep(SweepError::Hal(HalError::Driver {
            operation: "configure",
            ..
        })))
    ));
}

#[test]
fn test_full_campaign_reports_every_point() {
    let target = SimulatedTarget::new(responder);
    let mut campaign = Campaign::new(fast_config(), target.rig()).unwrap();

    let analytics = campaign.run_with_store(&mut DiscardStore).unwrap();

    assert_eq!(analytics.phase, CampaignPhase::Complete);
    assert_eq!(analytics.stop_reason, Some(StopReason::Complete));
    assert_eq!(analytics.points_swept, 3);
    assert_eq!(analytics.no_payload_points, 1);
    assert_eq!(analytics.exhausted_points, 1);
    assert_eq!(analytics.candidates.len(), 1);

    let candidate = &analytics.candidates[0];
    assert_eq!(candidate.power, GlitchParameter::new(21, 55));
    assert_eq!(candidate.command, GlitchParameter::new(102, 1));
    assert_eq!(candidate.bytes, 64);
    assert!(!candidate.complete);

    assert_eq!(analytics.stats.attempts, 16);
    assert_eq!(analytics.stats.successes, 2);
    assert_eq!(
        analytics.stats.final_states.get(&BootState::Overflowed),
        Some(&2)
    );
}

#[test]
fn test_campaign_powers_on_before_sweeping() {
    let target = SimulatedTarget::new(responder);
    let mut campaign = Campaign::new(fast_config(), target.rig()).unwrap();
    campaign.run_with_store(&mut DiscardStore).unwrap();

    let calls = target.calls();
    let power_off = calls
        .iter()
        .position(|c| *c == DriverCall::Power(faultline_hal::LineState::HighImpedance))
        .unwrap();
    let first_arm = calls
        .iter()
        .position(|c| matches!(c, DriverCall::Arm(..)))
        .unwrap();
    assert!(power_off < first_arm);
}

#[test]
fn test_stop_at_first_success() {
    let target = SimulatedTarget::new(responder);
    let mut config = fast_config();
    config.policy.stop_at_first_success = true;
    let mut campaign = Campaign::new(config, target.rig()).unwrap();

    let analytics = campaign.run_with_store(&mut DiscardStore).unwrap();

    assert_eq!(analytics.phase, CampaignPhase::Complete);
    assert_eq!(analytics.stop_reason, Some(StopReason::FirstSuccess));
    assert_eq!(analytics.points_swept, 2);
}

#[test]
fn test_wall_limit_gives_partial_report() {
    let target = SimulatedTarget::new(responder);
    let mut config = fast_config();
    config.limits.max_wall_secs = Some(0);
    let mut campaign = Campaign::new(config, target.rig()).unwrap();

    let analytics = campaign.run_with_store(&mut DiscardStore).unwrap();

    assert_eq!(analytics.phase, CampaignPhase::Aborted);
    assert_eq!(analytics.stop_reason, Some(StopReason::WallTimeExceeded));
    assert_eq!(analytics.points_swept, 0);
}

#[test]
fn test_operator_cancel() {
    let target = SimulatedTarget::new(responder);
    let mut campaign = Campaign::new(fast_config(), target.rig()).unwrap();
    campaign.cancel_handle().cancel();

    let analytics = campaign.run_with_store(&mut DiscardStore).unwrap();
    assert_eq!(analytics.stop_reason, Some(StopReason::UserAborted));
    assert_eq!(analytics.stats.attempts, 0);
}

#[test]
fn test_silent_target_fails_power_on() {
    let target = SimulatedTarget::silent();
    let mut campaign = Campaign::new(fast_config(), target.rig()).unwrap();

    let err = campaign.run_with_store(&mut DiscardStore).unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Sweep(SweepError::PowerOnTimeout { polls: 3 })
    ));
}

#[test]
fn test_run_writes_payload_and_report() {
    let dir = scratch_dir("campaign");
    let mut config = fast_config();
    config.output.path = dir.join("dumprom.bin");
    config.output.report = Some(dir.join("report.json"));

    let target = SimulatedTarget::new(responder).with_serial_chunk(7);
    let mut campaign = Campaign::new(config, target.rig()).unwrap();
    let analytics = campaign.run().unwrap();

    assert_eq!(fs::read(dir.join("dumprom.bin")).unwrap(), payload());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["phase"], "complete");
    assert_eq!(report["candidates"][0]["bytes"], 64);
    assert_eq!(report["stats"]["attempts"], analytics.stats.attempts);

    fs::remove_dir_all(&dir).unwrap();
}
