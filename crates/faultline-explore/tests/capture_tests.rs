use std::time::Duration;

use faultline_explore::cancel::CancelToken;
use faultline_explore::capture::{CapturePolicy, PayloadCapture};
use faultline_explore::event_loop::WaitPolicy;
use faultline_explore::SweepError;
use faultline_hal::sim::SimulatedTarget;
use faultline_protocol::types::{Command, ProtocolPacket};

fn policy() -> CapturePolicy {
    CapturePolicy {
        wait: WaitPolicy::new(3, Duration::ZERO),
        ..CapturePolicy::default()
    }
}

fn counting(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_all_zero_prefix_is_rejected() {
    let target = SimulatedTarget::silent();
    target.push_serial(&[0u8; 16]);
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(!capture.wait_for_data().unwrap());
}

#[test]
fn test_single_checksum_byte_is_accepted() {
    let target = SimulatedTarget::silent().with_serial_chunk(3);
    let mut prefix = [0u8; 16];
    prefix[4] = 1;
    target.push_serial(&prefix);
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(capture.wait_for_data().unwrap());
}

#[test]
fn test_short_prefix_is_fatal() {
    let target = SimulatedTarget::silent();
    target.push_serial(&[1u8; 8]);
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    let err = capture.wait_for_data().unwrap_err();
    assert!(matches!(
        err,
        SweepError::CaptureTimeout {
            received: 8,
            needed: 16
        }
    ));
}

#[test]
fn test_dump_includes_prefix_and_stops_at_cap() {
    let data = counting(5000);
    let target = SimulatedTarget::silent().with_serial_chunk(100);
    target.push_serial(&data);
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(capture.wait_for_data().unwrap());

    let mut sink: Vec<u8> = Vec::new();
    let payload = capture.dump_payload(&mut sink).unwrap();

    assert!(payload.complete);
    assert_eq!(payload.len(), 4096);
    assert_eq!(payload.bytes, data[..4096].to_vec());
    assert_eq!(sink, payload.bytes);
    assert_eq!(target.serial_buffered(), 5000 - 4096);
}

#[test]
fn test_quiet_target_gives_partial_dump() {
    let data = counting(1000);
    let target = SimulatedTarget::silent().with_serial_chunk(64);
    target.push_serial(&data);
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(capture.wait_for_data().unwrap());

    let mut sink: Vec<u8> = Vec::new();
    let payload = capture.dump_payload(&mut sink).unwrap();

    assert!(!payload.complete);
    assert_eq!(payload.bytes, data);
    assert_eq!(sink, data);
}

#[test]
fn test_bus_traffic_is_drained_during_dump() {
    let target = SimulatedTarget::silent();
    target.push_serial(&counting(64));
    target.push_packets((0..5).map(|i| ProtocolPacket::request(i, Command::ReadSingleBlock, 0)));
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(capture.wait_for_data().unwrap());
    let payload = capture.dump_payload(&mut std::io::sink()).unwrap();

    assert_eq!(payload.len(), 64);
    assert_eq!(target.pending_packets(), 0);
}

#[test]
fn test_small_cap_truncates_prefix() {
    let target = SimulatedTarget::silent();
    target.push_serial(&counting(64));
    let mut rig = target.rig();
    let policy = CapturePolicy {
        payload_cap: 20,
        validate_prefix: 16,
        ..policy()
    };
    let cancel = CancelToken::new();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(capture.wait_for_data().unwrap());
    let payload = capture.dump_payload(&mut Vec::<u8>::new()).unwrap();

    assert!(payload.complete);
    assert_eq!(payload.len(), 20);
}

#[test]
fn test_cancelled_capture() {
    let target = SimulatedTarget::silent();
    let mut rig = target.rig();
    let policy = policy();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut capture = PayloadCapture::new(&mut rig.bus, &mut rig.serial, &policy, &cancel);
    assert!(matches!(
        capture.wait_for_data(),
        Err(SweepError::Cancelled)
    ));
}
