//! Workflow engine: the entry point callers use to create and drive workflows.
//!
//! Every operation reads the current state from the store, checks it against
//! the dependency resolver and the step state machine, writes the result in
//! one compare-and-swap commit (step, audit entries, outbox events, cached
//! progress) and finally flushes the outbox to subscribers. Callers always get
//! the stored post-transition state back.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::directory::{Directory, Worker};
use crate::error::{EngineError, Result};
use crate::events::{Event, EventEmitter, Subscription};
use crate::store::{StepCommit, StepStore};
use crate::workflow::{
    self, Dependency, DependencyResolver, DisplayStatus, Guard, LogEntry, MacroTask,
    MacroTaskPatch, Operation, Priority, StateMachine, Step, StepAction, StepStatus, WorkerId,
};

/// One stage of a chained workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub function: String,
    pub assignee: WorkerId,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Defaults to the macro task's priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Input of [`WorkflowEngine::create_workflow`].
///
/// Exactly one of `functions` (legacy mode: independent steps, assignee
/// resolved from the directory) or `stages` (chained mode) must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub drive_link: Option<String>,
    pub deadline: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

enum StepPlan<'a> {
    Legacy(&'a [String]),
    Chained(&'a [StageSpec]),
}

impl WorkflowSpec {
    fn plan(&self) -> Result<StepPlan<'_>> {
        match (self.functions.is_empty(), self.stages.is_empty()) {
            (true, false) => Ok(StepPlan::Chained(&self.stages)),
            (false, true) => Ok(StepPlan::Legacy(&self.functions)),
            (true, true) => Err(EngineError::Validation(
                "a workflow needs at least one stage".to_string(),
            )),
            (false, false) => Err(EngineError::Validation(
                "give either a function list or chained stages, not both".to_string(),
            )),
        }
    }
}

/// A step together with its derived eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: Step,
    pub eligible: bool,
    pub display_status: DisplayStatus,
}

impl StepView {
    pub fn new(step: Step, eligible: bool) -> Self {
        let display_status = DisplayStatus::derive(step.status, eligible);
        Self {
            step,
            eligible,
            display_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroTaskView {
    pub macro_task: MacroTask,
    pub steps: Vec<StepView>,
    pub progress: Option<u8>,
    /// Newest first.
    pub logs: Vec<LogEntry>,
}

impl MacroTaskView {
    pub fn step_at(&self, position: u32) -> Option<&StepView> {
        self.steps.iter().find(|s| s.step.position == position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    pub entry: LogEntry,
    pub description: String,
}

/// An open step in a worker's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub macro_task_id: Uuid,
    pub macro_task_title: String,
    pub deadline: NaiveDate,
    pub priority: Priority,
    pub step: StepView,
}

#[derive(Debug, Clone, Copy)]
struct ReturnRequest<'a> {
    target: &'a str,
    reason: &'a str,
}

pub struct WorkflowEngine<S, D> {
    store: S,
    directory: D,
    resolver: DependencyResolver,
    emitter: EventEmitter,
    config: EngineConfig,
}

impl<S: StepStore, D: Directory> WorkflowEngine<S, D> {
    pub fn new(store: S, directory: D, config: EngineConfig) -> Self {
        Self {
            store,
            directory,
            resolver: DependencyResolver::new(config.strict_dependencies),
            emitter: EventEmitter::new(config.event_buffer),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Subscribes to events from the start of the event log.
    pub fn subscribe(&self) -> Subscription {
        self.emitter.subscribe()
    }

    /// Pushes any outbox events left behind by an earlier failed flush.
    pub async fn flush_events(&self) -> Result<usize> {
        self.emitter.flush(&self.store).await
    }

    /// Creates a macro task and all of its steps in one atomic write.
    pub async fn create_workflow(&self, spec: WorkflowSpec) -> Result<MacroTaskView> {
        let title = spec.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("title is required".to_string()));
        }

        let mut task = MacroTask::new(title.to_string(), spec.deadline, spec.priority);
        task.description = spec.description.clone();
        task.drive_link = spec.drive_link.clone();

        let steps = match spec.plan()? {
            StepPlan::Legacy(functions) => {
                let mut steps = Vec::with_capacity(functions.len());
                for (index, function) in functions.iter().enumerate() {
                    let assignee = self.sole_assignee(index, function)?;
                    let mut step = Step::new(
                        task.id,
                        index as u32,
                        function.trim().to_string(),
                        assignee,
                        Dependency::None,
                    );
                    step.priority = spec.priority;
                    steps.push(step);
                }
                steps
            }
            StepPlan::Chained(stages) => {
                let mut steps: Vec<Step> = Vec::with_capacity(stages.len());
                for (index, stage) in stages.iter().enumerate() {
                    self.check_stage(index, stage)?;
                    let dependency = steps
                        .last()
                        .map(|prev| Dependency::On(prev.id))
                        .unwrap_or_default();
                    let mut step = Step::new(
                        task.id,
                        index as u32,
                        stage.function.trim().to_string(),
                        stage.assignee.clone(),
                        dependency,
                    );
                    step.tags = stage.tags.clone();
                    step.priority = stage.priority.unwrap_or(spec.priority);
                    step.weight = stage.weight;
                    steps.push(step);
                }
                steps
            }
        };
        task.progress = workflow::progress(&task, &steps);

        let mut logs = Vec::with_capacity(steps.len() * 2);
        for step in &steps {
            logs.push(LogEntry::system(step, StepAction::Created));
            if !self.resolver.is_eligible(step, &steps) {
                logs.push(LogEntry::system(step, StepAction::Blocked));
            }
        }
        let events = self.events_for(&task, &steps, &logs);

        let macro_task_id = task.id;
        let step_count = steps.len();
        self.store
            .insert_workflow(task, steps, logs, events)
            .await?;
        info!(%macro_task_id, title, steps = step_count, "workflow created");

        self.publish().await;
        self.macro_task_view(macro_task_id).await
    }

    pub async fn start_step(&self, step_id: Uuid, caller: &str) -> Result<StepView> {
        self.transition(step_id, caller, Operation::Start, None)
            .await
    }

    pub async fn complete_step(&self, step_id: Uuid, caller: &str) -> Result<StepView> {
        self.transition(step_id, caller, Operation::Complete, None)
            .await
    }

    /// Hands the step to `target` for revision, recording `reason`.
    pub async fn return_step(
        &self,
        step_id: Uuid,
        caller: &str,
        target: &str,
        reason: &str,
    ) -> Result<StepView> {
        let request = ReturnRequest { target, reason };
        self.transition(step_id, caller, Operation::Return, Some(request))
            .await
    }

    /// Macro task, its steps with eligibility, progress and newest-first logs.
    pub async fn macro_task_view(&self, macro_task_id: Uuid) -> Result<MacroTaskView> {
        let task = self.store.macro_task(macro_task_id).await?;
        let steps = self.store.steps(macro_task_id).await?;
        let mut logs = self.store.logs(macro_task_id).await?;
        logs.reverse();

        let progress = workflow::progress(&task, &steps);
        let eligibility = self.resolver.eligibility(&steps);
        let steps = steps
            .into_iter()
            .map(|s| {
                let eligible = eligibility.get(&s.id).copied().unwrap_or(true);
                StepView::new(s, eligible)
            })
            .collect();

        Ok(MacroTaskView {
            macro_task: task,
            steps,
            progress,
            logs,
        })
    }

    /// Audit entries of a macro task, newest first, with a rendered description.
    pub async fn activity(&self, macro_task_id: Uuid) -> Result<Vec<ActivityItem>> {
        let steps = self.store.steps(macro_task_id).await?;
        let functions: HashMap<Uuid, &str> = steps
            .iter()
            .map(|s| (s.id, s.function.as_str()))
            .collect();
        let logs = self.store.logs(macro_task_id).await?;

        Ok(logs
            .into_iter()
            .rev()
            .map(|entry| {
                let function = functions.get(&entry.step_id).copied().unwrap_or("unknown");
                let description =
                    entry.describe(function, |id| self.directory.display_name(id));
                ActivityItem { entry, description }
            })
            .collect())
    }

    /// Workers a step may be returned to.
    ///
    /// Those who already performed the step's function on other macro tasks
    /// come first.
    pub async fn return_candidates(&self, step_id: Uuid) -> Result<Vec<Worker>> {
        let step = self.store.step(step_id).await?;
        let experienced: HashSet<WorkerId> = self
            .store
            .steps_by_function(&step.function)
            .await?
            .into_iter()
            .filter(|s| s.macro_task_id != step.macro_task_id)
            .filter_map(|s| s.assignee)
            .collect();

        let mut candidates: Vec<Worker> = self
            .directory
            .workers_for(&step.function)
            .into_iter()
            .filter(|w| !step.is_assigned_to(&w.id))
            .collect();
        candidates.sort_by_key(|w| !experienced.contains(&w.id));
        Ok(candidates)
    }

    /// Open steps assigned to `worker`, soonest deadline first.
    pub async fn worker_queue(&self, worker: &str) -> Result<Vec<QueueItem>> {
        let assigned = self.store.steps_assigned_to(worker).await?;
        let mut parents: HashMap<Uuid, (MacroTask, Vec<Step>)> = HashMap::new();
        let mut items = Vec::new();

        for step in assigned
            .into_iter()
            .filter(|s| s.status != StepStatus::Completed)
        {
            let macro_task_id = step.macro_task_id;
            if !parents.contains_key(&macro_task_id) {
                let task = self.store.macro_task(macro_task_id).await?;
                let siblings = self.store.steps(macro_task_id).await?;
                parents.insert(macro_task_id, (task, siblings));
            }
            let (task, siblings) = &parents[&macro_task_id];
            let eligible = self.resolver.is_eligible(&step, siblings);
            items.push(QueueItem {
                macro_task_id,
                macro_task_title: task.title.clone(),
                deadline: task.deadline,
                priority: task.priority,
                step: StepView::new(step, eligible),
            });
        }

        items.sort_by(|a, b| {
            a.deadline
                .cmp(&b.deadline)
                .then(b.priority.cmp(&a.priority))
                .then(a.step.step.position.cmp(&b.step.step.position))
        });
        Ok(items)
    }

    /// Edits the macro task's own fields. Steps are not touched.
    pub async fn update_macro_task(
        &self,
        macro_task_id: Uuid,
        patch: MacroTaskPatch,
    ) -> Result<MacroTask> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(EngineError::Validation("title is required".to_string()));
        }
        let task = self.store.update_macro_task(macro_task_id, patch).await?;
        info!(%macro_task_id, status = %task.status, "macro task updated");
        Ok(task)
    }

    // Runs one transition, re-reading state after a write conflict.
    async fn transition(
        &self,
        step_id: Uuid,
        caller: &str,
        op: Operation,
        request: Option<ReturnRequest<'_>>,
    ) -> Result<StepView> {
        let mut attempt = 0;
        loop {
            match self.try_transition(step_id, caller, op, request).await {
                Ok(view) => {
                    self.publish().await;
                    return Ok(view);
                }
                Err(err) if err.is_retryable() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    warn!(%step_id, caller, %op, error = %err, attempt, "write conflict, re-reading step");
                }
                Err(err) => {
                    debug!(%step_id, caller, %op, error = %err, "transition rejected");
                    return Err(err);
                }
            }
        }
    }

    async fn try_transition(
        &self,
        step_id: Uuid,
        caller: &str,
        op: Operation,
        request: Option<ReturnRequest<'_>>,
    ) -> Result<StepView> {
        let step = self.store.step(step_id).await?;
        let steps = self.store.steps(step.macro_task_id).await?;
        let eligible = self.resolver.is_eligible(&step, &steps);

        let transition = StateMachine::evaluate(
            step.id,
            Guard {
                status: step.status,
                assignee: step.assignee.as_deref(),
                caller,
                eligible,
            },
            op,
        )?;

        let mut updated = step.clone();
        updated.status = transition.to;
        updated.updated_at = Utc::now();

        let mut logs = Vec::new();
        match (op, request) {
            (Operation::Return, Some(request)) => {
                let target = self.validate_return(&step, caller, request)?;
                updated.assignee = Some(target.to_string());
                logs.push(LogEntry::returned(&step, caller, target, request.reason));
            }
            (Operation::Return, None) => {
                return Err(EngineError::Validation(
                    "a return target is required".to_string(),
                ));
            }
            _ => logs.push(LogEntry::by(&step, transition.action, caller)),
        }

        let after: Vec<Step> = steps
            .iter()
            .map(|s| if s.id == updated.id { updated.clone() } else { s.clone() })
            .collect();
        if transition.to == StepStatus::Completed {
            for id in self.resolver.newly_eligible(&steps, &after) {
                if let Some(next) = after.iter().find(|s| s.id == id) {
                    logs.push(LogEntry::system(next, StepAction::Unblocked));
                }
            }
        }

        let task = self.store.macro_task(step.macro_task_id).await?;
        let events = self.events_for(&task, &after, &logs);

        let stored = self
            .store
            .commit(StepCommit {
                expected_status: step.status,
                expected_assignee: step.assignee.clone(),
                step: updated,
                refresh_progress: transition.to == StepStatus::Completed,
                logs,
                events,
            })
            .await?;

        info!(
            step_id = %stored.id,
            macro_task_id = %stored.macro_task_id,
            caller,
            action = %transition.action,
            from = %transition.from,
            to = %transition.to,
            "step transition accepted"
        );

        let eligible = self.resolver.is_eligible(&stored, &after);
        Ok(StepView::new(stored, eligible))
    }

    fn validate_return<'a>(
        &self,
        step: &Step,
        caller: &str,
        request: ReturnRequest<'a>,
    ) -> Result<&'a str> {
        let target = request.target.trim();
        if target.is_empty() {
            return Err(EngineError::Validation(
                "a return target is required".to_string(),
            ));
        }

        let min = self.config.min_return_reason_len;
        let len = request.reason.trim().chars().count();
        if len < min {
            return Err(EngineError::Validation(format!(
                "return reason must have at least {min} characters, got {len}"
            )));
        }

        if target == caller || step.is_assigned_to(target) {
            return Err(EngineError::Validation(format!(
                "step is already assigned to `{target}`"
            )));
        }

        if !self.directory.is_qualified(target, &step.function) {
            return Err(EngineError::Validation(format!(
                "`{target}` is not an active worker for function `{}`",
                step.function
            )));
        }
        Ok(target)
    }

    fn check_stage(&self, index: usize, stage: &StageSpec) -> Result<()> {
        let position = index + 1;
        let function = stage.function.trim();
        if function.is_empty() {
            return Err(EngineError::Validation(format!(
                "stage {position}: function is required"
            )));
        }
        if stage.weight == 0 {
            return Err(EngineError::Validation(format!(
                "stage {position}: weight must be positive"
            )));
        }
        if !self.directory.is_qualified(&stage.assignee, function) {
            return Err(EngineError::Validation(format!(
                "stage {position}: `{}` is not an active worker for function `{function}`",
                stage.assignee
            )));
        }
        Ok(())
    }

    // Legacy mode: the function must map to exactly one active worker.
    fn sole_assignee(&self, index: usize, function: &str) -> Result<WorkerId> {
        let position = index + 1;
        let function = function.trim();
        match self.directory.workers_for(function).as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(EngineError::Validation(format!(
                "stage {position}: no active worker for function `{function}`"
            ))),
            many => Err(EngineError::Validation(format!(
                "stage {position}: {} workers hold function `{function}`, assign one explicitly",
                many.len()
            ))),
        }
    }

    fn events_for(&self, task: &MacroTask, steps: &[Step], logs: &[LogEntry]) -> Vec<Event> {
        logs.iter()
            .map(|entry| {
                let function = steps
                    .iter()
                    .find(|s| s.id == entry.step_id)
                    .map(|s| s.function.as_str())
                    .unwrap_or_default();
                Event::from_log(entry, &task.title, function, |id| {
                    self.directory.display_name(id)
                })
            })
            .collect()
    }

    async fn publish(&self) {
        if let Err(err) = self.emitter.flush(&self.store).await {
            warn!(error = %err, "event flush failed, events stay in the outbox");
        }
    }
}
