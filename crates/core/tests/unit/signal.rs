//! # Signal Codec Tests
//!
//! Decoding engine exit events into signals and milestones, and the guest-side
//! protocol monitor.

use rstest::rstest;
use simphase_core::common::Tick;
use simphase_core::engine::RawEvent;
use simphase_core::signal::codec::{WORK_ITEM_ID_OFFSET, causes, decode, encode};
use simphase_core::signal::{
    GuestCode, GuestProtocol, Milestone, ProtocolMonitor, Signal, SignalKind, Stage,
};

#[rstest]
#[case(causes::EXIT, 0, SignalKind::Exit)]
#[case(causes::FAIL, 3, SignalKind::Fail)]
#[case(causes::WORK_BEGIN, 105, SignalKind::WorkBegin)]
#[case(causes::WORK_END, 105, SignalKind::WorkEnd)]
#[case(causes::USER_INTERRUPT, 0, SignalKind::UserInterrupt)]
#[case("checkpoint", 0, SignalKind::Unknown)]
fn test_decode_kind(#[case] cause: &str, #[case] code: i64, #[case] kind: SignalKind) {
    let sig = decode(&RawEvent::new(cause, code, Tick(42)));
    assert_eq!(sig.kind(), kind);
    assert_eq!(sig.tick(), Tick(42));
}

#[test]
fn test_work_item_ids_drop_guest_offset() {
    let sig = decode(&RawEvent::new(causes::WORK_END, WORK_ITEM_ID_OFFSET + 7, Tick(1)));
    assert_eq!(sig.code(), 7);
    assert_eq!(sig.milestone(), Milestone::WorkEnd(7));
}

#[test]
fn test_fail_codes_map_to_milestones() {
    let cases = [
        (GuestCode::BootComplete, Milestone::BootComplete),
        (GuestCode::ContainerStarted, Milestone::ContainerStarted),
        (GuestCode::ContainerPinned, Milestone::ContainerPinned),
        (GuestCode::WarmingDone, Milestone::WarmDone),
        (GuestCode::WarmStop, Milestone::WarmDone),
        (GuestCode::ClientStopped, Milestone::MeasureDone),
        (GuestCode::ContainerStopped, Milestone::ContainerStopped),
        (GuestCode::TestDone, Milestone::TestDone),
        (GuestCode::RecvResponse, Milestone::Info(GuestCode::RecvResponse)),
    ];
    for (code, milestone) in cases {
        let sig = decode(&RawEvent::new(causes::FAIL, code.code(), Tick(0)));
        assert_eq!(sig.milestone(), milestone, "code {code}");
    }
}

#[test]
fn test_unknown_fail_code_is_unrecognised() {
    let sig = decode(&RawEvent::new(causes::FAIL, 77, Tick(0)));
    assert_eq!(sig.kind(), SignalKind::Fail);
    assert_eq!(sig.milestone(), Milestone::Unrecognised);
}

#[test]
fn test_unknown_cause_is_not_an_error() {
    let sig = decode(&RawEvent::new("switchcpu", 0, Tick(9)));
    assert_eq!(sig.milestone(), Milestone::Unrecognised);
}

#[test]
fn test_encode_inverts_decode_for_guest_signals() {
    for sig in GuestProtocol::new(2, 2).signals() {
        assert_eq!(decode(&encode(&sig)), sig);
    }
    let interrupt = Signal::new(SignalKind::UserInterrupt, 0, Tick(5));
    assert_eq!(encode(&interrupt).cause, causes::USER_INTERRUPT);
}

#[test]
fn test_guest_code_display() {
    assert_eq!(GuestCode::BootComplete.to_string(), "1: BOOTING complete");
    assert_eq!(GuestCode::TestDone.to_string(), "-1: Test done");
}

#[test]
fn test_monitor_flags_stale_boot_marker() {
    let mut monitor = ProtocolMonitor::starting_at(Stage::ContainerPinned);
    assert!(
        monitor
            .observe(&Signal::fail(GuestCode::BootComplete, Tick(1)))
            .is_err()
    );
    assert_eq!(monitor.last(), Some(Stage::ContainerPinned));
    assert_eq!(monitor.violations(), 1);
}
