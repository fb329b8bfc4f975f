//! # Dual-Node Synchronization Tests
//!
//! Construction-time causality checks, the warm/measure barrier across two machines
//! running at different speeds, frame delivery over the link, failure propagation,
//! paired setup checkpoints and resuming the round loop from restored clocks.

use proptest::prelude::*;
use simphase_core::checkpoint::CheckpointTag;
use simphase_core::common::{EventQueueId, NodeId, OrchestratorError, Tick};
use simphase_core::config::ConfigError;
use simphase_core::controller::ExperimentPhase;
use simphase_core::engine::{EngineCall, ScriptedEngine, Trace, TraceEntry};
use simphase_core::signal::GuestCode;
use simphase_core::stats::{FailReason, Outcome};
use simphase_core::sync::{DualNodeSynchronizer, NodeState, SyncError};

use crate::common::harness::{TestContext, post_pinned_trace, setup_trace, work_items};

const QUANTUM: Tick = Tick(1_000);
const DELAY: Tick = Tick(2_000);

fn pair(ctx: &TestContext, primary: Trace, driver: Trace) -> (ScriptedEngine, ScriptedEngine) {
    (
        ctx.engine_for(NodeId::PRIMARY, primary),
        ctx.engine_for(NodeId::DRIVER, driver),
    )
}

fn measuring_tick(sync: &DualNodeSynchronizer<ScriptedEngine>, node: NodeId) -> Tick {
    sync.controller(node)
        .report()
        .phases
        .iter()
        .find(|e| e.phase == ExperimentPhase::Measuring)
        .map(|e| e.tick)
        .unwrap()
}

proptest! {
    #[test]
    fn prop_delay_not_above_quantum_fails(q in 1u64..1_000_000_000, frac in 0.0f64..=1.0) {
        let d = (q as f64 * frac) as u64;
        let ctx = TestContext::new().dual(Tick(q), Tick(d));
        let (a, b) = pair(&ctx, Trace::new(), Trace::new());
        let err = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap_err();
        prop_assert!(matches!(
            err,
            OrchestratorError::Sync(SyncError::Config(ConfigError::LinkDelayTooShort { .. }))
        ), "expected LinkDelayTooShort, got {:?}", err);
    }

    #[test]
    fn prop_delay_above_twice_quantum_succeeds(q in 1u64..1_000_000_000, extra in 1u64..1_000_000) {
        let ctx = TestContext::new().dual(Tick(q), Tick(2 * q + extra));
        let (a, b) = pair(&ctx, Trace::new(), Trace::new());
        prop_assert!(DualNodeSynchronizer::new(&ctx.config, a, b).is_ok());
    }
}

#[test]
fn test_bad_margin_maps_to_config_exit_status() {
    let ctx = TestContext::new().dual(QUANTUM, QUANTUM);
    let (a, b) = pair(&ctx, Trace::new(), Trace::new());
    let err = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_event_queues_are_disjoint() {
    let mut ctx = TestContext::new().dual(QUANTUM, DELAY);
    ctx.config.cores.num_cores = 2;
    ctx.config.cores.driver_cores = 1;
    let (a, b) = pair(&ctx, Trace::new(), Trace::new());
    let sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    assert_eq!(
        sync.engine(NodeId::PRIMARY).event_queues(),
        &[EventQueueId(1), EventQueueId(2)]
    );
    assert_eq!(sync.engine(NodeId::DRIVER).event_queues(), &[EventQueueId(3)]);
}

#[test]
fn test_barrier_holds_fast_node_until_slow_node_warms() {
    let ctx = TestContext::new()
        .evaluation(CheckpointTag::Boot)
        .with_budgets(3, 2)
        .dual(QUANTUM, DELAY);
    let _ = ctx.seed_pair(CheckpointTag::Boot, Tick::ZERO);
    let fast = post_pinned_trace(3, 2, Tick(100));
    let slow = post_pinned_trace(3, 2, Tick(500));
    let (a, b) = pair(&ctx, fast, slow);

    let mut sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = sync.run().unwrap();
    assert!(report.is_success());

    // The fast node finished warm-up at 700, the slow one at 3500; both cross into
    // measurement together at the first sync point after the slow one.
    let a_measure = measuring_tick(&sync, NodeId::PRIMARY);
    let b_measure = measuring_tick(&sync, NodeId::DRIVER);
    assert_eq!(a_measure, Tick(4_000));
    assert_eq!(b_measure, Tick(4_000));

    let fast_calls = sync.engine(NodeId::PRIMARY).calls();
    let reset = fast_calls
        .iter()
        .position(|c| *c == EngineCall::ResetStats)
        .unwrap();
    let idles = fast_calls[..reset]
        .iter()
        .filter(|c| matches!(c, EngineCall::Idle(_)))
        .count();
    assert_eq!(idles, 4);

    for node in [NodeId::PRIMARY, NodeId::DRIVER] {
        let r = sync.controller(node).report();
        assert_eq!(r.outcome, Outcome::Completed);
        assert_eq!(r.stats_resets, 1);
        assert_eq!(r.stats_dumps, 1);
        assert_eq!(r.warm_invocations, 3);
        assert_eq!(r.measured_invocations, 2);
        assert_eq!(sync.state(node), NodeState::Finished);
    }
}

#[test]
fn test_frames_arrive_after_link_delay() {
    let ctx = TestContext::new()
        .evaluation(CheckpointTag::Warm)
        .with_budgets(-1, 1)
        .dual(QUANTUM, DELAY);
    let _ = ctx.seed_pair(CheckpointTag::Warm, Tick::ZERO);

    let stopped = TraceEntry::Fail {
        code: GuestCode::ContainerStopped.code(),
        delay: Tick(100),
    };
    let primary = work_items(0..1, Tick(3_000)).with(stopped.clone());
    let driver = Trace::new()
        .with(TraceEntry::Send {
            payload: b"GET /".to_vec(),
            delay: Tick(50),
        })
        .with(TraceEntry::WorkBegin {
            id: 0,
            delay: Tick(10),
        })
        .with(TraceEntry::WorkEnd {
            id: 0,
            delay: Tick(5_000),
        })
        .with(stopped);
    let (a, b) = pair(&ctx, primary, driver);
    let mut sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = sync.run().unwrap();
    assert!(report.is_success());
    assert_eq!(report.packets, 1);

    let inbox = sync.engine(NodeId::PRIMARY).inbox();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].src, NodeId::DRIVER);
    assert_eq!(inbox[0].sent_at, Tick(50));
    assert_eq!(inbox[0].deliver_at, Tick(2_050));
    assert_eq!(inbox[0].payload, b"GET /".to_vec());
    assert!(sync.engine(NodeId::DRIVER).inbox().is_empty());
    assert_eq!(sync.link().carried(), 1);
}

#[test]
fn test_failure_takes_peer_down() {
    let ctx = TestContext::new()
        .evaluation(CheckpointTag::Warm)
        .with_budgets(-1, 5)
        .dual(QUANTUM, DELAY);
    let _ = ctx.seed_pair(CheckpointTag::Warm, Tick::ZERO);

    let primary = work_items(0..1, Tick(100)).with(TraceEntry::Interrupt { delay: Tick(100) });
    let driver = work_items(0..5, Tick(10_000));
    let (a, b) = pair(&ctx, primary, driver);
    let mut sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = sync.run().unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.primary.outcome,
        Outcome::Failed {
            reason: FailReason::UserInterrupt
        }
    );
    assert_eq!(
        report.driver.outcome,
        Outcome::Failed {
            reason: FailReason::PeerFailed
        }
    );
    assert_eq!(report.driver.stats_dumps, 0);
    assert_eq!(report.rounds, 1);
}

#[test]
fn test_dual_setup_checkpoints_resume_in_dual_evaluation() {
    let ctx = TestContext::new().dual(QUANTUM, DELAY);
    // The primary pins at 300, the driver at 2700.
    let (a, b) = pair(&ctx, setup_trace(Tick(100)), setup_trace(Tick(900)));
    let mut setup = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = setup.run().unwrap();
    assert!(report.is_success());

    let records: Vec<_> = [&report.primary, &report.driver]
        .iter()
        .map(|r| r.checkpoints[0].clone())
        .collect();
    assert_eq!(records[0].node, NodeId::PRIMARY);
    assert_eq!(records[1].node, NodeId::DRIVER);
    assert_ne!(records[0].path, records[1].path);
    // Both were held until the driver pinned, then saved at the same sync point.
    assert_eq!(records[0].tick, Tick(3_000));
    assert_eq!(records[1].tick, Tick(3_000));

    let ctx = ctx.evaluation(CheckpointTag::Boot).with_budgets(1, 1);
    let trace = || post_pinned_trace(1, 1, Tick(100));
    let (a, b) = pair(&ctx, trace(), trace());
    let mut eval = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = eval.run().unwrap();
    assert!(report.is_success());

    for (node, record) in [NodeId::PRIMARY, NodeId::DRIVER].into_iter().zip(&records) {
        let calls = eval.engine(node).calls();
        assert!(calls.contains(&EngineCall::Restore(record.path.clone())));
        let r = eval.controller(node).report();
        assert_eq!(r.start_tick, Tick(3_000));
        assert_eq!(r.outcome, Outcome::Completed);
    }
}

#[test]
fn test_rounds_start_at_restored_tick() {
    let restored = Tick(50_000_000);
    let ctx = TestContext::new()
        .evaluation(CheckpointTag::Boot)
        .with_budgets(1, 1)
        .dual(QUANTUM, DELAY);
    let _ = ctx.seed_pair(CheckpointTag::Boot, restored);
    let trace = || post_pinned_trace(1, 1, Tick(100));
    let (a, b) = pair(&ctx, trace(), trace());

    let mut sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let report = sync.run().unwrap();
    assert!(report.is_success());
    assert!(report.rounds <= 3, "ran {} rounds", report.rounds);
    assert!(sync.now() > restored);
    assert!(measuring_tick(&sync, NodeId::PRIMARY) > restored);
}

#[test]
fn test_restored_clocks_must_agree() {
    let ctx = TestContext::new()
        .evaluation(CheckpointTag::Warm)
        .with_budgets(-1, 1)
        .dual(QUANTUM, DELAY);
    let _ = ctx.seed_checkpoint_at(NodeId::PRIMARY, CheckpointTag::Warm, Tick::ZERO);
    let _ = ctx.seed_checkpoint_at(NodeId::DRIVER, CheckpointTag::Warm, Tick(5_000));
    let (a, b) = pair(&ctx, work_items(0..1, Tick(100)), work_items(0..1, Tick(100)));

    let mut sync = DualNodeSynchronizer::new(&ctx.config, a, b).unwrap();
    let err = sync.run().unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Sync(SyncError::ClockMismatch {
            primary: Tick(0),
            driver: Tick(5_000),
        })
    ));
    assert_eq!(err.exit_code(), 5);
    assert!(!sync.report().is_success());
}
