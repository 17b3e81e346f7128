use retrace_core::BacktrackError;

/// Progress of one backtrack through its destructive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktrackState {
    Idle,
    TargetResolved,
    CommitsAtRiskEnumerated,
    UserConfirmed,
    Reset,
    Done,
    Aborted,
}

impl BacktrackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BacktrackState::Done | BacktrackState::Aborted)
    }
}

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(BacktrackState, &[BacktrackState])] = &[
    (
        BacktrackState::Idle,
        &[BacktrackState::TargetResolved, BacktrackState::Aborted],
    ),
    (
        BacktrackState::TargetResolved,
        &[BacktrackState::CommitsAtRiskEnumerated, BacktrackState::Aborted],
    ),
    (
        BacktrackState::CommitsAtRiskEnumerated,
        &[BacktrackState::UserConfirmed, BacktrackState::Aborted],
    ),
    (
        BacktrackState::UserConfirmed,
        &[BacktrackState::Reset, BacktrackState::Aborted],
    ),
    (
        BacktrackState::Reset,
        &[BacktrackState::Done, BacktrackState::Aborted],
    ),
    // Done and Aborted are terminal
];

fn is_valid_transition(from: BacktrackState, to: BacktrackState) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

/// Guards the order of the reset flow. Every step goes through
/// [`ResetMachine::advance`]; a step out of order is an internal error.
#[derive(Debug)]
pub struct ResetMachine {
    state: BacktrackState,
}

impl Default for ResetMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetMachine {
    pub fn new() -> Self {
        Self {
            state: BacktrackState::Idle,
        }
    }

    pub fn state(&self) -> BacktrackState {
        self.state
    }

    pub fn advance(&mut self, to: BacktrackState) -> Result<(), BacktrackError> {
        if !is_valid_transition(self.state, to) {
            return Err(BacktrackError::Internal(format!(
                "invalid transition: {:?} → {:?}",
                self.state, to
            )));
        }
        tracing::debug!(from = ?self.state, to = ?to, "backtrack state");
        self.state = to;
        Ok(())
    }

    /// Move to `Aborted` from any non-terminal state.
    pub fn abort(&mut self) -> Result<(), BacktrackError> {
        self.advance(BacktrackState::Aborted)
    }
}
