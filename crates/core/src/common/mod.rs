//! Common types shared by every orchestration component.
//!
//! This module provides the small building blocks the rest of the crate is written against:
//! 1. **Simulated time:** the [`Tick`] newtype and conversions from wall-clock units.
//! 2. **Identifiers:** [`NodeId`] for machines and [`EventQueueId`] for engine event queues.
//! 3. **Error taxonomy:** the crate-wide [`OrchestratorError`] and its exit-status mapping.

/// Crate-wide error aggregation and exit statuses.
pub mod error;

/// Simulated-time and identifier newtypes.
pub mod tick;

pub use error::{ExitStatus, OrchestratorError};
pub use tick::{EventQueueId, NodeId, TICKS_PER_SECOND, Tick};
