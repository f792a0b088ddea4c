//! Attempt state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one supervised attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    #[default]
    Spawning,
    Running,
    TimedOut,
    ShuttingDown,
    Success,
    Failed,
}

impl AttemptState {
    /// Whether the state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use AttemptState::{Failed, Running, ShuttingDown, Spawning, Success, TimedOut};
        matches!(
            (self, next),
            (Spawning, Running | Failed)
                | (Running, Success | Failed | TimedOut | ShuttingDown)
                | (TimedOut, ShuttingDown)
                | (ShuttingDown, Failed)
        )
    }
}

/// State machine for tracking attempt progress.
#[derive(Debug, Clone)]
pub struct AttemptStateMachine {
    state: AttemptState,
    timeouts: usize,
}

impl Default for AttemptStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AttemptState::Spawning,
            timeouts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Number of times the attempt entered `TimedOut`.
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.timeouts
    }

    /// Move to `new_state`. Returns false and stays put if the move is not allowed.
    pub fn transition(&mut self, new_state: AttemptState) -> bool {
        if !self.state.can_transition_to(new_state) {
            tracing::debug!(from = ?self.state, to = ?new_state, "Ignoring invalid transition");
            return false;
        }
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        if new_state == AttemptState::TimedOut {
            self.timeouts = self.timeouts.saturating_add(1);
        }
        self.state = new_state;
        true
    }
}
