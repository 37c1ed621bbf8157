use thiserror::Error;
use uuid::Uuid;

use crate::workflow::StepStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller is not allowed to act on the step (not its assignee).
    #[error("worker `{caller}` is not the assignee of step {step_id}")]
    GuardViolation { step_id: Uuid, caller: String },

    /// The step's dependency predecessor is not completed yet.
    #[error("step {step_id} is blocked: its dependency is not completed")]
    PreconditionNotMet { step_id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The step is no longer in a status the operation accepts.
    #[error("step {step_id} changed concurrently (current status: {status})")]
    Conflict { step_id: Uuid, status: StepStatus },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn step_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "step",
            id: id.to_string(),
        }
    }

    pub fn macro_task_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "macro task",
            id: id.to_string(),
        }
    }

    /// `true` for write conflicts, which the engine retries after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_violation_display() {
        let id = Uuid::nil();
        let err = EngineError::GuardViolation {
            step_id: id,
            caller: "bruno".into(),
        };
        assert_eq!(
            err.to_string(),
            format!("worker `bruno` is not the assignee of step {id}")
        );
    }

    #[test]
    fn conflict_shows_observed_status() {
        let err = EngineError::Conflict {
            step_id: Uuid::nil(),
            status: StepStatus::Completed,
        };
        assert!(err.to_string().ends_with("(current status: concluida)"));
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_helpers() {
        let err = EngineError::macro_task_not_found(Uuid::nil());
        assert!(err.to_string().starts_with("macro task not found"));
        assert!(!err.is_retryable());
        assert!(!EngineError::Validation("reason too short".into()).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
    }
}
