//! Call state machine implementation.

use std::fmt;

/// Current state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallState {
    /// Before registration completed and before any call setup.
    #[default]
    Idle,
    /// Local description created and sent or being sent, awaiting the peer.
    Negotiating,
    /// Both sides accepted; media hand-off is imminent.
    Active,
    /// Fatal error or rejection. Nothing is negotiated any more.
    Terminated,
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Negotiating => "NEGOTIATING",
            Self::Active => "ACTIVE",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransition {
    /// The local description is ready and is about to be sent.
    NegotiationStarted,
    /// The peer accepted and the remote description is in place.
    Established,
    Terminated { reason: String },
}

/// Owns the state of one call session and the states it went through.
#[derive(Debug, Clone)]
pub struct CallStateMachine {
    state: CallState,
    history: Vec<CallState>,
    termination_reason: Option<String>,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            history: vec![CallState::Idle],
            termination_reason: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[CallState] {
        &self.history
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    /// Apply a state transition. Returns error if transition is invalid.
    ///
    /// States are never re-entered: the only ways forward are
    /// Idle → Negotiating → Active, plus Terminated from any live state.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<CallState, InvalidTransition> {
        let new_state = match (self.state, &transition) {
            (CallState::Idle, CallTransition::NegotiationStarted) => CallState::Negotiating,
            (CallState::Negotiating, CallTransition::Established) => CallState::Active,
            (current, CallTransition::Terminated { reason }) if !current.is_terminated() => {
                self.termination_reason = Some(reason.clone());
                CallState::Terminated
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: current,
                    attempted: transition.clone(),
                });
            }
        };
        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: CallState,
    pub attempted: CallTransition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {:?} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminate(reason: &str) -> CallTransition {
        CallTransition::Terminated {
            reason: reason.to_string(),
        }
    }

    /// Flow: Idle → Negotiating → Active
    #[test]
    fn test_successful_call_flow() {
        let mut call = CallStateMachine::new();
        assert_eq!(call.state(), CallState::Idle);

        call.apply_transition(CallTransition::NegotiationStarted)
            .unwrap();
        assert_eq!(call.state(), CallState::Negotiating);

        call.apply_transition(CallTransition::Established).unwrap();
        assert!(call.state().is_active());

        assert_eq!(
            call.history(),
            &[CallState::Idle, CallState::Negotiating, CallState::Active]
        );
    }

    #[test]
    fn test_terminate_from_every_live_state() {
        let paths: [&[CallTransition]; 3] = [
            &[],
            &[CallTransition::NegotiationStarted],
            &[CallTransition::NegotiationStarted, CallTransition::Established],
        ];
        for path in paths {
            let mut call = CallStateMachine::new();
            for t in path {
                call.apply_transition(t.clone()).unwrap();
            }
            call.apply_transition(terminate("registration rejected"))
                .unwrap();
            assert!(call.state().is_terminated());
            assert_eq!(call.termination_reason(), Some("registration rejected"));
        }
    }

    #[test]
    fn test_terminated_is_final() {
        let mut call = CallStateMachine::new();
        call.apply_transition(terminate("call rejected")).unwrap();

        for t in [
            CallTransition::NegotiationStarted,
            CallTransition::Established,
            terminate("again"),
        ] {
            let err = call.apply_transition(t).unwrap_err();
            assert_eq!(err.current_state, CallState::Terminated);
        }
        assert_eq!(call.termination_reason(), Some("call rejected"));
        assert_eq!(call.history(), &[CallState::Idle, CallState::Terminated]);
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let mut call = CallStateMachine::new();
        assert!(call.apply_transition(CallTransition::Established).is_err());

        call.apply_transition(CallTransition::NegotiationStarted)
            .unwrap();
        assert!(
            call.apply_transition(CallTransition::NegotiationStarted)
                .is_err()
        );

        call.apply_transition(CallTransition::Established).unwrap();
        assert!(call.apply_transition(CallTransition::Established).is_err());
        assert!(
            call.apply_transition(CallTransition::NegotiationStarted)
                .is_err()
        );
    }

    /// Whatever sequence of transitions is attempted, the recorded history
    /// is an ordered prefix of Idle, Negotiating, Active, optionally cut
    /// short by a single Terminated.
    #[test]
    fn test_history_is_monotonic() {
        let moves = [
            CallTransition::NegotiationStarted,
            CallTransition::Established,
            terminate("x"),
        ];
        // Every sequence of three moves, repetitions included.
        for a in 0..3 {
            for b in 0..3 {
                for c in 0..3 {
                    let mut call = CallStateMachine::new();
                    for i in [a, b, c] {
                        let _ = call.apply_transition(moves[i].clone());
                    }
                    assert_monotonic(call.history());
                }
            }
        }
    }

    fn assert_monotonic(history: &[CallState]) {
        let rank = |s: &CallState| match s {
            CallState::Idle => 0,
            CallState::Negotiating => 1,
            CallState::Active => 2,
            CallState::Terminated => 3,
        };
        assert_eq!(history.first(), Some(&CallState::Idle));
        for pair in history.windows(2) {
            assert!(rank(&pair[0]) < rank(&pair[1]), "history went back: {history:?}");
        }
        let live = history.iter().take_while(|s| !s.is_terminated()).count();
        assert!(history.len() - live <= 1, "terminated twice: {history:?}");
    }
}
