//! Pre-game countdown.
//!
//! After a successful `startGame` the gateway broadcasts `"3"`, `"2"`, `"1"`,
//! `"GO!"` one interval apart. The countdown is a plain state machine polled from
//! [`Gateway::update`](crate::Gateway::update); every poll that would emit a step
//! first re-checks whether the session is still active and silently stops if it
//! is not (the player quit or went home mid-countdown).

use web_time::{Duration, Instant};

/// One emitted countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// A numbered step, counting down to 1.
    Count(u32),
    /// The final step.
    Go,
}

impl CountdownStep {
    /// The text sent in the `countdown` envelope.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Count(n) => n.to_string(),
            Self::Go => "GO!".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running { remaining: u32, next_at: Instant },
}

/// Countdown state machine.
#[derive(Debug, Clone)]
pub struct Countdown {
    steps: u32,
    interval: Duration,
    phase: Phase,
}

impl Countdown {
    /// A countdown of `steps` numbered steps, `interval` apart. `steps == 0`
    /// disables it entirely.
    #[must_use]
    pub const fn new(steps: u32, interval: Duration) -> Self {
        Self {
            steps,
            interval,
            phase: Phase::Idle,
        }
    }

    /// Starts (or restarts) the countdown. The first step is due immediately.
    pub fn arm(&mut self, now: Instant) {
        if self.steps == 0 {
            return;
        }
        self.phase = Phase::Running {
            remaining: self.steps,
            next_at: now,
        };
    }

    /// Stops the countdown without emitting anything further.
    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Whether a countdown is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Advances the countdown. Returns the step to broadcast, if one is due.
    ///
    /// `session_active` is only consulted when a step is due; if it is false the
    /// countdown is cancelled and nothing is emitted.
    pub fn poll(&mut self, now: Instant, session_active: impl FnOnce() -> bool) -> Option<CountdownStep> {
        let Phase::Running { remaining, next_at } = self.phase else {
            return None;
        };
        if now < next_at {
            return None;
        }
        if !session_active() {
            tracing::debug!(remaining, "countdown aborted, session no longer active");
            self.cancel();
            return None;
        }
        if remaining == 0 {
            self.phase = Phase::Idle;
            return Some(CountdownStep::Go);
        }
        self.phase = Phase::Running {
            remaining: remaining - 1,
            next_at: now + self.interval,
        };
        Some(CountdownStep::Count(remaining))
    }
}
