//! Task status transitions.
//!
//! Validates the transition graph named in the data model:
//!
//! ```text
//! todo        -> in_progress  (assignment)
//! in_progress -> done         (agent reports 100%)
//! in_progress -> todo         (lease expiry / abandonment)
//! in_progress -> blocked      (unresolved blocker)
//! blocked     -> todo         (blocker resolved, task returns to pool)
//! ```

use super::TaskStatus;
use crate::error::{CoreError, Result};

pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Todo, InProgress)
                | (InProgress, Done)
                | (InProgress, Todo)
                | (InProgress, Blocked)
                | (Blocked, Todo)
        )
    }

    /// Validate a transition, returning `ErrInvalidTransition` (I2/I3) if
    /// the edge is not in the graph above.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<()> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(format!(
                "cannot transition task from {from:?} to {to:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn assignment_edge_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(Todo, InProgress));
    }

    #[test]
    fn completion_edge_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(InProgress, Done));
    }

    #[test]
    fn recycle_edge_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(InProgress, Todo));
    }

    #[test]
    fn done_is_terminal() {
        assert!(!TaskStateMachine::is_valid_transition(Done, Todo));
        assert!(!TaskStateMachine::is_valid_transition(Done, InProgress));
    }

    #[test]
    fn blocked_returns_to_todo_only() {
        assert!(TaskStateMachine::is_valid_transition(Blocked, Todo));
        assert!(!TaskStateMachine::is_valid_transition(Blocked, Done));
    }

    #[test]
    fn validate_surfaces_typed_error() {
        let err = TaskStateMachine::validate(Done, Todo).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }
}
