//! Outbound send throttle.
//!
//! Each session tracks a virtual next-send slot that advances by a fixed
//! step per message and is floored at `now - burst window`, so an idle
//! session can burst a handful of lines and then settles into one line per
//! step, matching common server flood limits.

use std::time::{Duration, Instant};

/// Virtual-time advance per message.
pub const SEND_STEP: Duration = Duration::from_millis(2000);

/// How far the virtual slot may lag behind the wall clock, i.e. the burst
/// allowance after idle (10 s / 2 s ≈ 6 immediate lines).
pub const BURST_WINDOW: Duration = Duration::from_millis(10_000);

/// Per-session throttle state.
#[derive(Debug, Default)]
pub struct SendThrottle {
    next_slot: Option<Instant>,
}

impl SendThrottle {
    /// Fresh throttle with the full burst allowance.
    pub fn new() -> Self {
        SendThrottle::default()
    }

    /// Claim the next send slot. Returns `None` when the line may go out
    /// immediately, or `Some(at)` when it must be delayed until `at`.
    pub fn acquire(&mut self, now: Instant) -> Option<Instant> {
        let floor = now.checked_sub(BURST_WINDOW).unwrap_or(now);
        let slot = self.next_slot.map_or(floor, |next| next.max(floor));
        self.next_slot = Some(slot + SEND_STEP);
        if slot <= now {
            None
        } else {
            Some(slot)
        }
    }
}
