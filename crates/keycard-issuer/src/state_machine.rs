//! Issuance state machine.
//!
//! Tracks one card issuance attempt from opening the devices to handing the
//! card to the guest, and the failure path that retains the card.
//!
//! # States
//!
//! - `Start`: nothing done yet
//! - `HandlesOpen`: both device handles are open
//! - `StatusChecked`: the dispenser can issue a card
//! - `Encoded`: the payload is on the card and the chip is halted
//! - `Positioned`: the card is at the dispensing mouth
//! - `Ejected`: the card was pushed out
//! - `Done`: the attempt succeeded
//! - `Failing`: a step failed
//! - `Retaining`: the card is being moved into the retain box
//! - `Failed`: the attempt is over and reported as failed
//!
//! # Valid Transitions
//!
//! - Start → HandlesOpen → StatusChecked → Encoded → Positioned → Ejected → Done
//! - Start, HandlesOpen, StatusChecked, Encoded, Positioned → Failing
//! - Failing → Retaining → Failed
//! - Failing → Failed
//!
//! # Examples
//!
//! ```
//! use keycard_issuer::{IssuanceState, IssuanceStateMachine};
//!
//! let mut machine = IssuanceStateMachine::new();
//! machine.transition_to(IssuanceState::HandlesOpen).unwrap();
//! assert_eq!(machine.current_state(), IssuanceState::HandlesOpen);
//!
//! assert!(machine.transition_to(IssuanceState::Done).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use keycard_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of state transitions to keep in history.
///
/// A full attempt takes at most seven transitions; the history spans
/// several attempts when the machine is reused.
const MAX_HISTORY_SIZE: usize = 64;

/// Phase of a card issuance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceState {
    Start,
    HandlesOpen,
    StatusChecked,
    Encoded,
    Positioned,
    Ejected,
    Done,
    Failing,
    Retaining,
    Failed,
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            IssuanceState::Start => "Start",
            IssuanceState::HandlesOpen => "HandlesOpen",
            IssuanceState::StatusChecked => "StatusChecked",
            IssuanceState::Encoded => "Encoded",
            IssuanceState::Positioned => "Positioned",
            IssuanceState::Ejected => "Ejected",
            IssuanceState::Done => "Done",
            IssuanceState::Failing => "Failing",
            IssuanceState::Retaining => "Retaining",
            IssuanceState::Failed => "Failed",
        };
        write!(f, "{}", state_str)
    }
}

impl IssuanceState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use keycard_issuer::IssuanceState;
    ///
    /// assert!(IssuanceState::Start.can_transition_to(&IssuanceState::HandlesOpen));
    /// assert!(IssuanceState::Encoded.can_transition_to(&IssuanceState::Failing));
    /// assert!(!IssuanceState::Ejected.can_transition_to(&IssuanceState::Failing));
    /// ```
    pub fn can_transition_to(&self, target: &IssuanceState) -> bool {
        matches!(
            (self, target),
            // Success path
            (IssuanceState::Start, IssuanceState::HandlesOpen)
            | (IssuanceState::HandlesOpen, IssuanceState::StatusChecked)
            | (IssuanceState::StatusChecked, IssuanceState::Encoded)
            | (IssuanceState::Encoded, IssuanceState::Positioned)
            | (IssuanceState::Positioned, IssuanceState::Ejected)
            | (IssuanceState::Ejected, IssuanceState::Done)
            // Any step before ejection can fail
            | (
                IssuanceState::Start
                | IssuanceState::HandlesOpen
                | IssuanceState::StatusChecked
                | IssuanceState::Encoded
                | IssuanceState::Positioned,
                IssuanceState::Failing
            )
            // Failure path
            | (IssuanceState::Failing, IssuanceState::Retaining | IssuanceState::Failed)
            | (IssuanceState::Retaining, IssuanceState::Failed)
        )
    }

    /// `Done` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssuanceState::Done | IssuanceState::Failed)
    }
}

/// A single state transition with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: IssuanceState,
    pub to: IssuanceState,

    /// Not serialized; `Instant` is process-specific.
    #[serde(skip)]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: IssuanceState, to: IssuanceState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// State machine for one issuance attempt at a time.
///
/// Not thread-safe; the issuance service serializes access.
#[derive(Debug)]
pub struct IssuanceStateMachine {
    current_state: IssuanceState,
    history: VecDeque<StateTransition>,
}

impl Default for IssuanceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuanceStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: IssuanceState::Start,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> IssuanceState {
        self.current_state
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Transitions of the current attempt, oldest first.
    pub fn current_attempt(&self) -> Vec<StateTransition> {
        let start = self
            .history
            .iter()
            .rposition(|t| t.from == IssuanceState::Start)
            .unwrap_or(0);
        self.history.iter().skip(start).cloned().collect()
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the transition is not valid
    /// for the current state.
    pub fn transition_to(&mut self, new_state: IssuanceState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        self.current_state = new_state;

        Ok(transition)
    }

    /// Return to `Start` for the next attempt. History is kept.
    pub fn reset(&mut self) {
        self.current_state = IssuanceState::Start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SUCCESS_PATH: [IssuanceState; 6] = [
        IssuanceState::HandlesOpen,
        IssuanceState::StatusChecked,
        IssuanceState::Encoded,
        IssuanceState::Positioned,
        IssuanceState::Ejected,
        IssuanceState::Done,
    ];

    #[test]
    fn test_success_path() {
        let mut machine = IssuanceStateMachine::new();
        for state in SUCCESS_PATH {
            machine.transition_to(state).unwrap();
        }

        assert_eq!(machine.current_state(), IssuanceState::Done);
        assert!(machine.current_state().is_terminal());
        assert_eq!(machine.history().len(), 6);
    }

    #[rstest]
    #[case::validation(0)]
    #[case::status_check(1)]
    #[case::encoding(2)]
    #[case::dispense(4)]
    fn test_failure_from_any_step(#[case] steps: usize) {
        let mut machine = IssuanceStateMachine::new();
        for state in &SUCCESS_PATH[..steps] {
            machine.transition_to(*state).unwrap();
        }

        machine.transition_to(IssuanceState::Failing).unwrap();
        machine.transition_to(IssuanceState::Retaining).unwrap();
        machine.transition_to(IssuanceState::Failed).unwrap();

        assert_eq!(machine.current_state(), IssuanceState::Failed);
    }

    #[rstest]
    #[case(IssuanceState::Start, IssuanceState::Encoded)]
    #[case(IssuanceState::Ejected, IssuanceState::Failing)]
    #[case(IssuanceState::Done, IssuanceState::HandlesOpen)]
    #[case(IssuanceState::Failed, IssuanceState::Retaining)]
    #[case(IssuanceState::Retaining, IssuanceState::Done)]
    fn test_illegal_transitions(#[case] from: IssuanceState, #[case] to: IssuanceState) {
        assert!(!from.can_transition_to(&to));
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let mut machine = IssuanceStateMachine::new();

        let err = machine.transition_to(IssuanceState::Done).unwrap_err();

        assert_eq!(
            err,
            Error::InvalidStateTransition {
                from: "Start".to_string(),
                to: "Done".to_string()
            }
        );
        assert_eq!(machine.current_state(), IssuanceState::Start);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_reset_keeps_history_and_scopes_attempt() {
        let mut machine = IssuanceStateMachine::new();
        machine.transition_to(IssuanceState::Failing).unwrap();
        machine.transition_to(IssuanceState::Failed).unwrap();

        machine.reset();
        machine.transition_to(IssuanceState::HandlesOpen).unwrap();

        assert_eq!(machine.history().len(), 3);
        let attempt = machine.current_attempt();
        assert_eq!(attempt.len(), 1);
        assert_eq!(attempt[0].to, IssuanceState::HandlesOpen);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = IssuanceStateMachine::new();
        for _ in 0..40 {
            machine.transition_to(IssuanceState::Failing).unwrap();
            machine.transition_to(IssuanceState::Failed).unwrap();
            machine.reset();
        }

        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
    }
}
