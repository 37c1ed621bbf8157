//! Plan files: a workflow definition plus a script of worker actions.
//!
//! `esteira run plan.toml` creates the workflow and replays each action in
//! order against the engine. Rejected actions are reported, not fatal, so a
//! plan can demonstrate the guards as well as the happy path.
//!
//! ```toml
//! [workflow]
//! title = "Landing page"
//! deadline = "2026-11-30"
//!
//! [[workflow.stages]]
//! function = "design"
//! assignee = "ana"
//!
//! [[actions]]
//! op = "start"
//! stage = 0
//! caller = "ana"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directory::{Directory, Worker};
use crate::engine::{MacroTaskView, WorkflowEngine, WorkflowSpec};
use crate::error::{EngineError, Result};
use crate::store::StepStore;
use crate::workflow::Operation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub op: Operation,
    /// Position of the step within the workflow, starting at 0.
    pub stage: u32,
    pub caller: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub workflow: WorkflowSpec,
    /// Workers added to the configured directory for this plan.
    #[serde(default)]
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub actions: Vec<PlanAction>,
}

/// Outcome of one replayed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub index: usize,
    pub op: Operation,
    pub stage: u32,
    pub caller: String,
    /// `None` when the action was accepted.
    pub error: Option<String>,
}

const DEMO_PLAN: &str = r#"
[workflow]
title = "Spring campaign landing page"
deadline = "2026-11-30"
priority = "high"

[[workflow.stages]]
function = "design"
assignee = "ana"

[[workflow.stages]]
function = "review"
assignee = "bruno"

[[workflow.stages]]
function = "publish"
assignee = "carla"

[[workers]]
id = "ana"
name = "Ana"
functions = ["design"]

[[workers]]
id = "bruno"
name = "Bruno"
functions = ["review"]

[[workers]]
id = "xavier"
name = "Xavier"
functions = ["review"]

[[workers]]
id = "carla"
name = "Carla"
functions = ["publish"]

[[actions]]
op = "start"
stage = 1
caller = "bruno"

[[actions]]
op = "start"
stage = 0
caller = "ana"

[[actions]]
op = "complete"
stage = 0
caller = "ana"

[[actions]]
op = "start"
stage = 1
caller = "bruno"

[[actions]]
op = "return"
stage = 1
caller = "bruno"
target = "xavier"
reason = "too short"

[[actions]]
op = "return"
stage = 1
caller = "bruno"
target = "xavier"
reason = "needs revision"

[[actions]]
op = "start"
stage = 1
caller = "xavier"

[[actions]]
op = "complete"
stage = 1
caller = "xavier"

[[actions]]
op = "start"
stage = 2
caller = "carla"

[[actions]]
op = "complete"
stage = 2
caller = "carla"
"#;

impl Plan {
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// The built-in A → B → C scenario used by `esteira demo`.
    pub fn demo() -> Self {
        Self::parse(DEMO_PLAN).expect("invalid built-in demo plan")
    }

    /// Creates the workflow and replays every action against `engine`.
    pub async fn replay<S: StepStore, D: Directory>(
        &self,
        engine: &WorkflowEngine<S, D>,
    ) -> Result<(MacroTaskView, Vec<ActionReport>)> {
        let created = engine.create_workflow(self.workflow.clone()).await?;
        let macro_task_id = created.macro_task.id;

        let mut reports = Vec::with_capacity(self.actions.len());
        for (index, action) in self.actions.iter().enumerate() {
            let step_id = created
                .step_at(action.stage)
                .map(|s| s.step.id)
                .ok_or_else(|| EngineError::NotFound {
                    kind: "stage",
                    id: action.stage.to_string(),
                })?;

            let caller = action.caller.as_str();
            let outcome = match action.op {
                Operation::Start => engine.start_step(step_id, caller).await,
                Operation::Complete => engine.complete_step(step_id, caller).await,
                Operation::Return => {
                    engine
                        .return_step(
                            step_id,
                            caller,
                            action.target.as_deref().unwrap_or_default(),
                            action.reason.as_deref().unwrap_or_default(),
                        )
                        .await
                }
            };
            reports.push(ActionReport {
                index,
                op: action.op,
                stage: action.stage,
                caller: action.caller.clone(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        let view = engine.macro_task_view(macro_task_id).await?;
        Ok((view, reports))
    }
}
