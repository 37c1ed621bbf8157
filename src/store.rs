//! Durable records for macro tasks, steps, audit entries and the event outbox.
//!
//! [`StepStore`] is the only shared mutable resource of the engine. Every
//! transition is written through [`StepStore::commit`], a compare-and-swap on
//! the step's status and assignee that also appends the audit entries and the
//! outbox events of the transition. The outbox doubles as the event log:
//! published events stay readable through [`StepStore::events_after`] so a
//! subscriber that fell behind can catch up. [`InMemoryStore`] implements it
//! behind a single `tokio` mutex.

use std::collections::HashMap;
use std::future::Future;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::events::Event;
use crate::workflow::{self, LogEntry, MacroTask, MacroTaskPatch, Step, StepStatus, WorkerId};

/// A transition write, applied atomically or not at all.
#[derive(Debug, Clone)]
pub struct StepCommit {
    /// Status the step had when the transition was evaluated.
    pub expected_status: StepStatus,
    /// Assignee the step had when the transition was evaluated.
    pub expected_assignee: Option<WorkerId>,
    /// New version of the step.
    pub step: Step,
    /// Recompute the parent macro task's cached progress in the same write.
    pub refresh_progress: bool,
    pub logs: Vec<LogEntry>,
    pub events: Vec<Event>,
}

pub trait StepStore: Send + Sync {
    /// Inserts a macro task with its steps, audit entries and events.
    /// Nothing is persisted if any part fails.
    fn insert_workflow(
        &self,
        task: MacroTask,
        steps: Vec<Step>,
        logs: Vec<LogEntry>,
        events: Vec<Event>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn macro_task(&self, id: Uuid) -> impl Future<Output = Result<MacroTask>> + Send;

    fn macro_tasks(&self) -> impl Future<Output = Result<Vec<MacroTask>>> + Send;

    /// Applies `patch` to a macro task's own fields and recomputes its cached
    /// progress from the stored steps, in one write. Steps are untouched.
    fn update_macro_task(
        &self,
        id: Uuid,
        patch: MacroTaskPatch,
    ) -> impl Future<Output = Result<MacroTask>> + Send;

    fn step(&self, id: Uuid) -> impl Future<Output = Result<Step>> + Send;

    /// Steps of a macro task ordered by position.
    fn steps(&self, macro_task_id: Uuid) -> impl Future<Output = Result<Vec<Step>>> + Send;

    /// Steps of any macro task performing `function`.
    fn steps_by_function(&self, function: &str)
    -> impl Future<Output = Result<Vec<Step>>> + Send;

    fn steps_assigned_to(&self, worker: &str) -> impl Future<Output = Result<Vec<Step>>> + Send;

    /// Applies a transition if the stored step still matches the expectation,
    /// otherwise fails with [`EngineError::Conflict`]. Returns the stored step.
    fn commit(&self, commit: StepCommit) -> impl Future<Output = Result<Step>> + Send;

    /// Audit entries of a macro task, oldest first.
    fn logs(&self, macro_task_id: Uuid) -> impl Future<Output = Result<Vec<LogEntry>>> + Send;

    /// Outbox events not yet published, in sequence order.
    fn pending_events(&self) -> impl Future<Output = Result<Vec<Event>>> + Send;

    /// Marks events as published. They stay in the log.
    fn ack_events(&self, ids: &[Uuid]) -> impl Future<Output = Result<()>> + Send;

    /// Every committed event with a sequence above `sequence`, in order,
    /// published or not.
    fn events_after(&self, sequence: u64) -> impl Future<Output = Result<Vec<Event>>> + Send;
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<Uuid, MacroTask>,
    steps: HashMap<Uuid, Step>,
    logs: Vec<LogEntry>,
    outbox: Vec<OutboxEntry>,
    next_sequence: u64,
}

#[derive(Debug)]
struct OutboxEntry {
    event: Event,
    published: bool,
}

impl Inner {
    fn enqueue(&mut self, events: Vec<Event>) {
        for mut event in events {
            self.next_sequence += 1;
            event.sequence = self.next_sequence;
            self.outbox.push(OutboxEntry {
                event,
                published: false,
            });
        }
    }

    fn sorted_steps(&self, filter: impl Fn(&Step) -> bool) -> Vec<Step> {
        let mut steps: Vec<Step> = self.steps.values().filter(|s| filter(*s)).cloned().collect();
        steps.sort_by_key(|s| (s.macro_task_id, s.position));
        steps
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepStore for InMemoryStore {
    async fn insert_workflow(
        &self,
        task: MacroTask,
        steps: Vec<Step>,
        logs: Vec<LogEntry>,
        events: Vec<Event>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(EngineError::Validation(format!(
                "macro task {} already exists",
                task.id
            )));
        }
        if let Some(step) = steps
            .iter()
            .find(|s| s.macro_task_id != task.id || inner.steps.contains_key(&s.id))
        {
            return Err(EngineError::Validation(format!(
                "step {} cannot be inserted under macro task {}",
                step.id, task.id
            )));
        }

        for step in steps {
            inner.steps.insert(step.id, step);
        }
        inner.tasks.insert(task.id, task);
        inner.logs.extend(logs);
        inner.enqueue(events);
        Ok(())
    }

    async fn macro_task(&self, id: Uuid) -> Result<MacroTask> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::macro_task_not_found(id))
    }

    async fn macro_tasks(&self) -> Result<Vec<MacroTask>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<MacroTask> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn update_macro_task(&self, id: Uuid, patch: MacroTaskPatch) -> Result<MacroTask> {
        let mut inner = self.inner.lock().await;
        let steps = inner.sorted_steps(|s| s.macro_task_id == id);
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::macro_task_not_found(id))?;
        patch.apply(task);
        task.progress = workflow::progress(task, &steps);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn step(&self, id: Uuid) -> Result<Step> {
        let inner = self.inner.lock().await;
        inner
            .steps
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::step_not_found(id))
    }

    async fn steps(&self, macro_task_id: Uuid) -> Result<Vec<Step>> {
        let inner = self.inner.lock().await;
        if !inner.tasks.contains_key(&macro_task_id) {
            return Err(EngineError::macro_task_not_found(macro_task_id));
        }
        Ok(inner.sorted_steps(|s| s.macro_task_id == macro_task_id))
    }

    async fn steps_by_function(&self, function: &str) -> Result<Vec<Step>> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_steps(|s| s.function.eq_ignore_ascii_case(function)))
    }

    async fn steps_assigned_to(&self, worker: &str) -> Result<Vec<Step>> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_steps(|s| s.is_assigned_to(worker)))
    }

    async fn commit(&self, commit: StepCommit) -> Result<Step> {
        let mut inner = self.inner.lock().await;
        let step_id = commit.step.id;
        let stored = inner
            .steps
            .get_mut(&step_id)
            .ok_or_else(|| EngineError::step_not_found(step_id))?;

        if stored.status != commit.expected_status || stored.assignee != commit.expected_assignee {
            return Err(EngineError::Conflict {
                step_id,
                status: stored.status,
            });
        }
        *stored = commit.step.clone();

        if commit.refresh_progress {
            let macro_task_id = commit.step.macro_task_id;
            let steps = inner.sorted_steps(|s| s.macro_task_id == macro_task_id);
            if let Some(task) = inner.tasks.get_mut(&macro_task_id) {
                task.progress = workflow::progress(task, &steps);
                task.updated_at = Utc::now();
            }
        }

        inner.logs.extend(commit.logs);
        inner.enqueue(commit.events);
        Ok(commit.step)
    }

    async fn logs(&self, macro_task_id: Uuid) -> Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.macro_task_id == macro_task_id)
            .cloned()
            .collect())
    }

    async fn pending_events(&self) -> Result<Vec<Event>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbox
            .iter()
            .filter(|e| !e.published)
            .map(|e| e.event.clone())
            .collect())
    }

    async fn ack_events(&self, ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for entry in inner.outbox.iter_mut() {
            if ids.contains(&entry.event.id) {
                entry.published = true;
            }
        }
        Ok(())
    }

    async fn events_after(&self, sequence: u64) -> Result<Vec<Event>> {
        let inner = self.inner.lock().await;
        // Sequences are dense and start at 1, so the log index is `sequence`.
        let start = usize::try_from(sequence).unwrap_or(usize::MAX);
        Ok(inner
            .outbox
            .iter()
            .skip(start)
            .map(|e| e.event.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Dependency, Priority, StepAction};
    use chrono::NaiveDate;

    fn seed() -> (MacroTask, Vec<Step>) {
        let task = MacroTask::new(
            "Brochure".into(),
            NaiveDate::from_ymd_opt(2026, 12, 15).unwrap(),
            Priority::High,
        );
        let a = Step::new(task.id, 0, "design".into(), "ana".into(), Dependency::None);
        let b = Step::new(
            task.id,
            1,
            "review".into(),
            "bruno".into(),
            Dependency::On(a.id),
        );
        (task, vec![b, a])
    }

    fn event_for(step: &Step, action: StepAction) -> Event {
        Event::from_log(&LogEntry::system(step, action), "Brochure", &step.function, |id| {
            id.to_string()
        })
    }

    #[tokio::test]
    async fn insert_then_read_back_ordered_steps() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        store
            .insert_workflow(task.clone(), steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        let stored = store.steps(task.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].position, 0);
        assert_eq!(stored[1].position, 1);
        assert_eq!(store.macro_task(task.id).await.unwrap().title, "Brochure");
    }

    #[tokio::test]
    async fn insert_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let (task, mut steps) = seed();
        steps[1].macro_task_id = Uuid::new_v4();

        let err = store
            .insert_workflow(task.clone(), steps, Vec::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.macro_tasks().await.unwrap().is_empty());
        assert!(matches!(
            store.steps(task.id).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn commit_rejects_stale_expectation() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        let head = steps[1].clone();
        store
            .insert_workflow(task, steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        let mut started = head.clone();
        started.status = StepStatus::InProgress;
        let commit = StepCommit {
            expected_status: StepStatus::Pending,
            expected_assignee: head.assignee.clone(),
            step: started,
            refresh_progress: false,
            logs: vec![LogEntry::by(&head, StepAction::Started, "ana")],
            events: Vec::new(),
        };
        store.commit(commit.clone()).await.unwrap();

        let err = store.commit(commit).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                status: StepStatus::InProgress,
                ..
            }
        ));
        assert_eq!(store.logs(head.macro_task_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_refreshes_cached_progress() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        let head = steps[1].clone();
        store
            .insert_workflow(task.clone(), steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        let mut done = head.clone();
        done.status = StepStatus::Completed;
        store
            .commit(StepCommit {
                expected_status: StepStatus::Pending,
                expected_assignee: head.assignee.clone(),
                step: done,
                refresh_progress: true,
                logs: Vec::new(),
                events: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(store.macro_task(task.id).await.unwrap().progress, Some(50));
    }

    #[tokio::test]
    async fn outbox_assigns_sequence_and_keeps_published_log() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        let events = vec![
            event_for(&steps[1], StepAction::Created),
            event_for(&steps[0], StepAction::Created),
            event_for(&steps[0], StepAction::Blocked),
        ];
        store
            .insert_workflow(task, steps, Vec::new(), events)
            .await
            .unwrap();

        let pending = store.pending_events().await.unwrap();
        let sequences: Vec<u64> = pending.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        store.ack_events(&[pending[0].id]).await.unwrap();
        let pending = store.pending_events().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sequence, 2);

        // Published events remain readable for subscribers catching up.
        let log: Vec<u64> = store
            .events_after(0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(log, vec![1, 2, 3]);
        let tail = store.events_after(2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 3);
        assert!(store.events_after(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_macro_task_recomputes_progress_in_the_same_write() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        let head = steps[1].clone();
        store
            .insert_workflow(task.clone(), steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        // Completed behind the back of whoever read the task earlier.
        let mut done = head.clone();
        done.status = StepStatus::Completed;
        store
            .commit(StepCommit {
                expected_status: StepStatus::Pending,
                expected_assignee: head.assignee.clone(),
                step: done,
                refresh_progress: false,
                logs: Vec::new(),
                events: Vec::new(),
            })
            .await
            .unwrap();

        let patch = MacroTaskPatch {
            title: Some("Brochure v2".into()),
            ..MacroTaskPatch::default()
        };
        let updated = store.update_macro_task(task.id, patch).await.unwrap();
        assert_eq!(updated.title, "Brochure v2");
        assert_eq!(updated.progress, Some(50));
        assert_eq!(store.macro_task(task.id).await.unwrap(), updated);

        let err = store
            .update_macro_task(Uuid::new_v4(), MacroTaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn steps_by_function_and_assignee_scan_all_tasks() {
        let store = InMemoryStore::new();
        let (task, steps) = seed();
        store
            .insert_workflow(task, steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        let (other, other_steps) = seed();
        store
            .insert_workflow(other, other_steps, Vec::new(), Vec::new())
            .await
            .unwrap();

        assert_eq!(store.steps_by_function("REVIEW").await.unwrap().len(), 2);
        assert_eq!(store.steps_assigned_to("ana").await.unwrap().len(), 2);
        assert!(store.steps_assigned_to("zoe").await.unwrap().is_empty());
    }
}
