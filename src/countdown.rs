//! Countdown state machine for the elimination round.
//!
//! Continuous qualifying presence for the full round length ends the round.
//! A single frame without presence resets the timer to zero; there is no
//! partial credit and no debouncing.

use serde::Serialize;
use std::time::Duration;

/// Default round length in seconds.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownPhase {
    /// No qualifying presence on the last frame.
    Idle,
    /// Presence has been continuous since `started_at`.
    Counting { started_at: Duration },
    /// The round ended. Terminal until `reset`.
    Expired,
}

/// Countdown value emitted for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CountdownSignal {
    pub countdown: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub game_over: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CountdownSignal {
    fn value(countdown: u32) -> Self {
        Self {
            countdown,
            game_over: false,
        }
    }

    fn game_over() -> Self {
        Self {
            countdown: 0,
            game_over: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CountdownMachine {
    phase: CountdownPhase,
    total: u32,
}

impl CountdownMachine {
    pub fn new(total_secs: u32) -> Self {
        Self {
            phase: CountdownPhase::Idle,
            total: total_secs.max(1),
        }
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn is_expired(&self) -> bool {
        self.phase == CountdownPhase::Expired
    }

    /// Time since continuous presence began, if counting.
    pub fn elapsed(&self, now: Duration) -> Option<Duration> {
        match self.phase {
            CountdownPhase::Counting { started_at } => Some(now.saturating_sub(started_at)),
            _ => None,
        }
    }

    /// Advance by one frame.
    ///
    /// In `Expired` the input is ignored and `{countdown: 0}` is returned, so
    /// game-over is reported exactly once per round.
    pub fn update(&mut self, present: bool, now: Duration) -> CountdownSignal {
        match self.phase {
            CountdownPhase::Expired => CountdownSignal::value(0),
            _ if !present => {
                self.phase = CountdownPhase::Idle;
                CountdownSignal::value(0)
            }
            CountdownPhase::Idle => {
                self.phase = CountdownPhase::Counting { started_at: now };
                CountdownSignal::value(self.total)
            }
            CountdownPhase::Counting { started_at } => {
                let elapsed = now.saturating_sub(started_at);
                if elapsed >= Duration::from_secs(self.total as u64) {
                    self.phase = CountdownPhase::Expired;
                    CountdownSignal::game_over()
                } else {
                    let whole = elapsed.as_secs() as u32;
                    CountdownSignal::value(self.total - whole)
                }
            }
        }
    }

    /// Return to `Idle` for a new round.
    pub fn reset(&mut self) {
        self.phase = CountdownPhase::Idle;
    }
}

impl Default for CountdownMachine {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN_SECS)
    }
}
