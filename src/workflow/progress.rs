//! Progress aggregator: weighted share of completed steps.
//!
//! A pure function of the stored steps. The store caches its result on the
//! macro task after every completion and every macro task edit.

use super::step::{MacroTask, Step, StepStatus};

/// Macro-task statuses that count as fully done when there are no steps.
const COMPLETED_LABELS: &[&str] = &["completed", "concluida", "concluída", "done"];

/// Weighted completion percentage of a macro task.
///
/// Returns `None` for a step-less macro task unless its own status says it is
/// completed, in which case it is 100.
pub fn progress(task: &MacroTask, steps: &[Step]) -> Option<u8> {
    let total: u64 = steps.iter().map(|s| u64::from(s.weight)).sum();
    if steps.is_empty() || total == 0 {
        let done = COMPLETED_LABELS
            .iter()
            .any(|label| task.status.trim().eq_ignore_ascii_case(label));
        return done.then_some(100);
    }
    let completed: u64 = steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .map(|s| u64::from(s.weight))
        .sum();
    Some((100.0 * completed as f64 / total as f64).round() as u8)
}
