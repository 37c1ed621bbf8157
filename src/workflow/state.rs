use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::{StepAction, StepStatus};
use crate::error::{EngineError, Result};

/// Operations a worker can request on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Complete,
    Return,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::Complete => write!(f, "complete"),
            Operation::Return => write!(f, "return"),
        }
    }
}

/// Facts about a step gathered before asking the machine for a transition.
#[derive(Debug, Clone, Copy)]
pub struct Guard<'a> {
    pub status: StepStatus,
    pub assignee: Option<&'a str>,
    pub caller: &'a str,
    pub eligible: bool,
}

/// An accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: StepStatus,
    pub to: StepStatus,
    pub action: StepAction,
}

/// Transition table of a single step.
///
/// ```text
/// pendente    --start-->    em_execucao
/// devolvida   --start-->    em_execucao
/// em_execucao --complete--> concluida
/// devolvida   --complete--> concluida
/// em_execucao --return-->   devolvida
/// devolvida   --return-->   devolvida
/// ```
pub struct StateMachine;

impl StateMachine {
    /// Target status for `op` from `from`, or `None` if the table has no edge.
    pub fn target(from: StepStatus, op: Operation) -> Option<StepStatus> {
        use StepStatus::*;
        match (from, op) {
            (Pending | Returned, Operation::Start) => Some(InProgress),
            (InProgress | Returned, Operation::Complete) => Some(Completed),
            (InProgress | Returned, Operation::Return) => Some(Returned),
            _ => None,
        }
    }

    /// Checks the guards of `op` and returns the transition to apply.
    ///
    /// Guards are checked in order: status edge, assignee, dependency gate.
    /// Return is not gated on eligibility since it never advances the chain.
    pub fn evaluate(step_id: Uuid, guard: Guard<'_>, op: Operation) -> Result<Transition> {
        let to = Self::target(guard.status, op).ok_or(EngineError::Conflict {
            step_id,
            status: guard.status,
        })?;

        if guard.assignee != Some(guard.caller) {
            return Err(EngineError::GuardViolation {
                step_id,
                caller: guard.caller.to_string(),
            });
        }

        if op != Operation::Return && !guard.eligible {
            return Err(EngineError::PreconditionNotMet { step_id });
        }

        let action = match op {
            Operation::Start => StepAction::Started,
            Operation::Complete => StepAction::Completed,
            Operation::Return => StepAction::Returned,
        };
        Ok(Transition {
            from: guard.status,
            to,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(status: StepStatus, caller: &str, eligible: bool) -> Guard<'_> {
        Guard {
            status,
            assignee: Some("ana"),
            caller,
            eligible,
        }
    }

    #[test]
    fn table_edges() {
        use StepStatus::*;
        assert_eq!(StateMachine::target(Pending, Operation::Start), Some(InProgress));
        assert_eq!(StateMachine::target(Returned, Operation::Start), Some(InProgress));
        assert_eq!(StateMachine::target(InProgress, Operation::Complete), Some(Completed));
        assert_eq!(StateMachine::target(Returned, Operation::Complete), Some(Completed));
        assert_eq!(StateMachine::target(InProgress, Operation::Return), Some(Returned));
        assert_eq!(StateMachine::target(Returned, Operation::Return), Some(Returned));

        assert_eq!(StateMachine::target(Pending, Operation::Complete), None);
        assert_eq!(StateMachine::target(Pending, Operation::Return), None);
        assert_eq!(StateMachine::target(InProgress, Operation::Start), None);
        assert_eq!(StateMachine::target(Completed, Operation::Start), None);
        assert_eq!(StateMachine::target(Completed, Operation::Return), None);
    }

    #[test]
    fn start_by_assignee_when_eligible() {
        let t = StateMachine::evaluate(
            Uuid::nil(),
            guard(StepStatus::Pending, "ana", true),
            Operation::Start,
        )
        .unwrap();
        assert_eq!(t.to, StepStatus::InProgress);
        assert_eq!(t.action, StepAction::Started);
    }

    #[test]
    fn non_assignee_is_a_guard_violation() {
        let err = StateMachine::evaluate(
            Uuid::nil(),
            guard(StepStatus::Pending, "bruno", true),
            Operation::Start,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::GuardViolation { .. }));
    }

    #[test]
    fn ineligible_start_and_complete_are_rejected() {
        let err = StateMachine::evaluate(
            Uuid::nil(),
            guard(StepStatus::Pending, "ana", false),
            Operation::Start,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::PreconditionNotMet { .. }));

        let err = StateMachine::evaluate(
            Uuid::nil(),
            guard(StepStatus::Returned, "ana", false),
            Operation::Complete,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::PreconditionNotMet { .. }));
    }

    #[test]
    fn completed_step_reports_conflict() {
        let err = StateMachine::evaluate(
            Uuid::nil(),
            guard(StepStatus::Completed, "ana", true),
            Operation::Complete,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                status: StepStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn operation_display() {
        assert_eq!(Operation::Start.to_string(), "start");
        assert_eq!(Operation::Complete.to_string(), "complete");
        assert_eq!(Operation::Return.to_string(), "return");
    }
}
