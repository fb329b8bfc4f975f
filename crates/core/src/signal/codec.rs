//! Engine exit event codec.
//!
//! The engine reports every stop as a free-form cause string plus an integer code.
//! [`decode`] maps those onto the [`Signal`] vocabulary; [`encode`] is its inverse and
//! is what scripted engines use to produce realistic events.
//!
//! Unknown causes are not errors: they decode to [`SignalKind::Unknown`] and the
//! controller logs them and keeps running.

use tracing::debug;

use super::{Signal, SignalKind};
use crate::engine::RawEvent;

/// Exit cause strings as reported by the simulation engine.
pub mod causes {
    /// `m5 exit` executed by the guest.
    pub const EXIT: &str = "m5_exit instruction encountered";
    /// `m5 fail <code>` executed by the guest.
    pub const FAIL: &str = "m5_fail instruction encountered";
    /// Start of an instrumented work item.
    pub const WORK_BEGIN: &str = "workbegin";
    /// End of an instrumented work item.
    pub const WORK_END: &str = "workend";
    /// SIGINT delivered to the simulator process.
    pub const USER_INTERRUPT: &str = "user interrupt received";
    /// A bounded `run` reached its tick limit. Never decoded into a signal.
    pub const LIMIT_REACHED: &str = "simulate() limit reached";
}

/// Offset the guest client adds to invocation indices before passing them to
/// `m5 workbegin`/`m5 workend`.
pub const WORK_ITEM_ID_OFFSET: i64 = 100;

/// Maps an engine exit event onto a [`Signal`].
///
/// Work-item codes have [`WORK_ITEM_ID_OFFSET`] removed; codes below the offset are
/// passed through unchanged (guests that do not offset their ids).
///
/// # Arguments
///
/// * `raw` - The event returned by the engine's `run` call.
///
/// # Returns
///
/// The decoded signal. Never fails; unrecognised causes become [`SignalKind::Unknown`].
pub fn decode(raw: &RawEvent) -> Signal {
    let kind = match raw.cause.as_str() {
        causes::EXIT => SignalKind::Exit,
        causes::FAIL => SignalKind::Fail,
        causes::WORK_BEGIN => SignalKind::WorkBegin,
        causes::WORK_END => SignalKind::WorkEnd,
        causes::USER_INTERRUPT => SignalKind::UserInterrupt,
        other => {
            debug!(cause = other, code = raw.code, "unrecognised exit cause");
            SignalKind::Unknown
        }
    };

    let code = match kind {
        SignalKind::WorkBegin | SignalKind::WorkEnd if raw.code >= WORK_ITEM_ID_OFFSET => {
            raw.code - WORK_ITEM_ID_OFFSET
        }
        _ => raw.code,
    };

    Signal::new(kind, code, raw.tick)
}

/// Converts a [`Signal`] back into the engine's exit event form.
///
/// [`SignalKind::Unknown`] has no canonical cause string and encodes as `"unknown"`.
pub fn encode(signal: &Signal) -> RawEvent {
    let (cause, code) = match signal.kind() {
        SignalKind::Exit => (causes::EXIT, signal.code()),
        SignalKind::Fail => (causes::FAIL, signal.code()),
        SignalKind::WorkBegin => (causes::WORK_BEGIN, signal.code() + WORK_ITEM_ID_OFFSET),
        SignalKind::WorkEnd => (causes::WORK_END, signal.code() + WORK_ITEM_ID_OFFSET),
        SignalKind::UserInterrupt => (causes::USER_INTERRUPT, signal.code()),
        SignalKind::Unknown => ("unknown", signal.code()),
    };
    RawEvent::new(cause, code, signal.tick())
}
