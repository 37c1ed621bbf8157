//! Dependency resolver: derives which steps may run from the stored step list.
//!
//! Holds no state of its own. Every read and every transition attempt
//! recomputes eligibility from the steps as they are stored.

use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;

use super::step::{Step, StepStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver {
    /// Treat a step whose predecessor no longer exists as blocked.
    pub strict_dependencies: bool,
}

impl DependencyResolver {
    pub fn new(strict_dependencies: bool) -> Self {
        Self {
            strict_dependencies,
        }
    }

    /// `true` when the step has no predecessor or its predecessor is completed.
    ///
    /// `steps` is the full step list of the step's macro task.
    pub fn is_eligible(&self, step: &Step, steps: &[Step]) -> bool {
        let Some(pred_id) = step.dependency.predecessor() else {
            return true;
        };
        match steps.iter().find(|s| s.id == pred_id) {
            Some(pred) => pred.status == StepStatus::Completed,
            None => {
                warn!(
                    step_id = %step.id,
                    predecessor = %pred_id,
                    strict = self.strict_dependencies,
                    "dependency predecessor is missing"
                );
                !self.strict_dependencies
            }
        }
    }

    /// Eligibility of every step, keyed by step id.
    pub fn eligibility(&self, steps: &[Step]) -> HashMap<Uuid, bool> {
        steps
            .iter()
            .map(|s| (s.id, self.is_eligible(s, steps)))
            .collect()
    }

    /// Ids of steps that are eligible in `after` but were not in `before`.
    pub fn newly_eligible(&self, before: &[Step], after: &[Step]) -> Vec<Uuid> {
        let was: HashSet<Uuid> = before
            .iter()
            .filter(|s| self.is_eligible(s, before))
            .map(|s| s.id)
            .collect();
        after
            .iter()
            .filter(|s| !was.contains(&s.id) && self.is_eligible(s, after))
            .map(|s| s.id)
            .collect()
    }
}
