//! Per-profile reconnect backoff and server rotation.
//!
//! The first attempt for a profile fires immediately; each subsequent
//! attempt doubles the wait, capped at 200 s, while the server index cycles
//! through the profile's server list. Successful registration clears the
//! state so the next outage starts fresh.

use std::collections::HashMap;

const INITIAL_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 200_000;

#[derive(Debug)]
struct AttemptState {
    server_index: usize,
    delay_ms: u64,
}

/// Tracks `(next-server-index, current-delay)` per profile.
#[derive(Debug, Default)]
pub struct ReconnectController {
    states: HashMap<String, AttemptState>,
}

impl ReconnectController {
    /// Fresh controller with no pending state.
    pub fn new() -> Self {
        ReconnectController::default()
    }

    /// Delay in milliseconds before the next attempt for `profile` should
    /// fire. Zero on the first attempt of an outage.
    pub fn next_delay(&mut self, profile: &str) -> u64 {
        match self.states.get(profile) {
            Some(state) => state.delay_ms,
            None => {
                self.states.insert(
                    profile.to_string(),
                    AttemptState {
                        server_index: 0,
                        delay_ms: INITIAL_DELAY_MS,
                    },
                );
                0
            }
        }
    }

    /// Called when the scheduled attempt fires: returns the server index to
    /// dial and advances the rotation and the backoff.
    pub fn take_attempt(&mut self, profile: &str, server_count: usize) -> usize {
        let state = self
            .states
            .entry(profile.to_string())
            .or_insert(AttemptState {
                server_index: 0,
                delay_ms: INITIAL_DELAY_MS,
            });
        let count = server_count.max(1);
        let index = state.server_index % count;
        state.server_index = (index + 1) % count;
        state.delay_ms = (state.delay_ms * 2).min(MAX_DELAY_MS);
        index
    }

    /// Registration succeeded; forget the backoff.
    pub fn clear(&mut self, profile: &str) {
        self.states.remove(profile);
    }
}
