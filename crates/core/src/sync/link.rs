//! Delayed point-to-point link between two machines.

use std::collections::VecDeque;

use tracing::trace;

use super::SyncError;
use crate::common::Tick;
use crate::engine::Packet;

/// Ethernet-style wire with a fixed propagation delay.
///
/// Frames are held until the synchronizer asks for the ones due inside the next
/// quantum window. A frame that would be due before that window starts means the
/// receiver has already simulated past its arrival; that is reported, never delivered.
#[derive(Debug, Clone)]
pub struct EtherLink {
    delay: Tick,
    in_flight: VecDeque<Packet>,
    carried: u64,
}

impl EtherLink {
    /// Link with propagation delay `delay`.
    pub const fn new(delay: Tick) -> Self {
        Self {
            delay,
            in_flight: VecDeque::new(),
            carried: 0,
        }
    }

    /// Propagation delay.
    pub const fn delay(&self) -> Tick {
        self.delay
    }

    /// Frames sent but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Frames delivered so far.
    pub const fn carried(&self) -> u64 {
        self.carried
    }

    /// Puts a frame on the wire. Its arrival time is `sent_at + delay`.
    pub fn send(&mut self, mut packet: Packet) {
        packet.deliver_at = packet.sent_at + self.delay;
        trace!(src = %packet.src, dst = %packet.dst, sent = %packet.sent_at, due = %packet.deliver_at, "frame on wire");
        let pos = self
            .in_flight
            .iter()
            .position(|p| p.deliver_at > packet.deliver_at)
            .unwrap_or(self.in_flight.len());
        self.in_flight.insert(pos, packet);
    }

    /// Removes and returns the frames due before `window_end`, in arrival order.
    ///
    /// # Errors
    ///
    /// [`SyncError::CausalityViolation`] if a due frame arrives before `window_start`.
    pub fn due(&mut self, window_start: Tick, window_end: Tick) -> Result<Vec<Packet>, SyncError> {
        let mut out = Vec::new();
        while self
            .in_flight
            .front()
            .is_some_and(|p| p.deliver_at < window_end)
        {
            let Some(packet) = self.in_flight.pop_front() else {
                break;
            };
            if packet.deliver_at < window_start {
                return Err(SyncError::CausalityViolation {
                    src: packet.src,
                    dst: packet.dst,
                    sent_at: packet.sent_at,
                    deliver_at: packet.deliver_at,
                    window_start,
                });
            }
            self.carried += 1;
            out.push(packet);
        }
        Ok(out)
    }
}
