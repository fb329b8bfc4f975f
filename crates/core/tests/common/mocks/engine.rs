use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mockall::mock;
use simphase_core::common::{EventQueueId, Tick};
use simphase_core::cores::{CoreKind, CoreState};
use simphase_core::engine::{EngineError, Packet, RawEvent, SimEngine};

mock! {
    pub Engine {}
    impl SimEngine for Engine {
        fn instantiate(&mut self) -> Result<(), EngineError>;
        fn restore(&mut self, checkpoint: &Path) -> Result<(), EngineError>;
        fn run(&mut self, limit: Option<Tick>) -> Result<RawEvent, EngineError>;
        fn cur_tick(&self) -> Tick;
        fn total_instructions(&self) -> u64;
        fn num_cores(&self) -> usize;
        fn core_state(&self, kind: CoreKind, core: usize) -> Option<CoreState>;
        fn switch_cores(&mut self, from: CoreKind, to: CoreKind) -> Result<(), EngineError>;
        fn reset_stats(&mut self) -> Result<(), EngineError>;
        fn dump_stats(&mut self) -> Result<(), EngineError>;
        fn save_checkpoint(&mut self, dir: &Path) -> Result<(), EngineError>;
        fn bind_event_queues(&mut self, queues: &[EventQueueId]) -> Result<(), EngineError>;
        fn idle_until(&mut self, limit: Tick) -> Result<(), EngineError>;
        fn take_outbound(&mut self) -> Vec<Packet>;
        fn deliver(&mut self, packet: Packet) -> Result<(), EngineError>;
    }
}

/// Mock with `cores` cores and `from` active. Once `switch_cores` is called the
/// reported states flip to `to` only if `honour_switch` is set.
pub fn switching_engine(cores: usize, from: CoreKind, to: CoreKind, honour_switch: bool) -> MockEngine {
    let switched = Arc::new(AtomicBool::new(false));
    let mut engine = MockEngine::new();
    engine.expect_num_cores().return_const(cores);

    let seen = Arc::clone(&switched);
    engine.expect_core_state().returning(move |kind, _core| {
        let active = if seen.load(Ordering::SeqCst) { to } else { from };
        Some(if kind == active {
            CoreState::Active
        } else {
            CoreState::SwitchedOut
        })
    });

    engine
        .expect_switch_cores()
        .times(1)
        .returning(move |_, _| {
            if honour_switch {
                switched.store(true, Ordering::SeqCst);
            }
            Ok(())
        });
    engine
}
