//! Polling state shared between a logging session and its logger connection

use strum_macros::{Display, EnumIter};

/// Phase within a multi step read
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Display, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PollPhase {
    /// First phase of a read. Requests are issued in this phase
    #[default]
    #[strum(serialize = "STATE_0")]
    State0,
    /// Second phase of a read, used by protocols which pace responses
    #[strum(serialize = "STATE_1")]
    State1,
}

/// Polling state of a logging session.
///
/// One instance exists per logging session, and is passed into every poll.
/// The `new_query` flag is set by the session whenever the parameter selection
/// changes, and is consumed by whichever polling path observes it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollState {
    new_query: bool,
    fast_poll: bool,
    current_state: PollPhase,
    last_state: PollPhase,
}

impl Default for PollState {
    fn default() -> Self {
        Self {
            new_query: true,
            fast_poll: false,
            current_state: PollPhase::State0,
            last_state: PollPhase::State0,
        }
    }
}

impl PollState {
    /// Creates a polling state for a new parameter selection
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this is the first poll of a new parameter selection
    pub fn is_new_query(&self) -> bool {
        self.new_query
    }

    /// Marks (or consumes) a new parameter selection
    pub fn set_new_query(&mut self, new_query: bool) {
        self.new_query = new_query
    }

    /// Returns true if the fast polling path is engaged
    pub fn is_fast_poll(&self) -> bool {
        self.fast_poll
    }

    /// Engages or disengages fast polling
    pub fn set_fast_poll(&mut self, fast_poll: bool) {
        self.fast_poll = fast_poll
    }

    /// Current phase
    pub fn current_state(&self) -> PollPhase {
        self.current_state
    }

    /// Sets the current phase
    pub fn set_current_state(&mut self, state: PollPhase) {
        self.current_state = state
    }

    /// Phase of the previous tick
    pub fn last_state(&self) -> PollPhase {
        self.last_state
    }

    /// Sets the phase of the previous tick
    pub fn set_last_state(&mut self, state: PollPhase) {
        self.last_state = state
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn fresh_state_is_a_new_query() {
        let state = PollState::new();
        assert!(state.is_new_query());
        assert!(!state.is_fast_poll());
        assert_eq!(PollPhase::State0, state.current_state());
        assert_eq!(PollPhase::State0, state.last_state());
    }

    #[test]
    fn phases_log_with_their_mode_name() {
        let names: Vec<String> = PollPhase::iter().map(|p| p.to_string()).collect();
        assert_eq!(vec!["STATE_0", "STATE_1"], names);
    }
}
