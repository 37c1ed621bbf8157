use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a worker as known by the identity provider.
pub type WorkerId = String;

/// Priority of a macro task or of a single stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Parses a priority label, accepting the English and Portuguese spellings.
    pub fn parse(s: &str) -> Option<Priority> {
        match s.trim().to_lowercase().as_str() {
            "low" | "baixa" => Some(Priority::Low),
            "medium" | "media" | "média" | "normal" => Some(Priority::Medium),
            "high" | "alta" => Some(Priority::High),
            "urgent" | "urgente" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl TryFrom<String> for Priority {
    type Error = String;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        Priority::parse(&label).ok_or_else(|| format!("unknown priority `{label}`"))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Persisted status of a step.
///
/// `bloqueada` is never stored: blocking is derived from the
/// dependency graph, see [`DisplayStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "em_execucao")]
    InProgress,
    #[serde(rename = "devolvida")]
    Returned,
    #[serde(rename = "concluida")]
    Completed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pendente"),
            StepStatus::InProgress => write!(f, "em_execucao"),
            StepStatus::Returned => write!(f, "devolvida"),
            StepStatus::Completed => write!(f, "concluida"),
        }
    }
}

/// Status shown to readers: the stored status plus the derived `bloqueada`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayStatus {
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "bloqueada")]
    Blocked,
    #[serde(rename = "em_execucao")]
    InProgress,
    #[serde(rename = "devolvida")]
    Returned,
    #[serde(rename = "concluida")]
    Completed,
}

impl DisplayStatus {
    pub fn derive(status: StepStatus, eligible: bool) -> Self {
        match status {
            StepStatus::Pending if !eligible => DisplayStatus::Blocked,
            StepStatus::Pending => DisplayStatus::Pending,
            StepStatus::InProgress => DisplayStatus::InProgress,
            StepStatus::Returned => DisplayStatus::Returned,
            StepStatus::Completed => DisplayStatus::Completed,
        }
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Pending => write!(f, "pendente"),
            DisplayStatus::Blocked => write!(f, "bloqueada"),
            DisplayStatus::InProgress => write!(f, "em_execucao"),
            DisplayStatus::Returned => write!(f, "devolvida"),
            DisplayStatus::Completed => write!(f, "concluida"),
        }
    }
}

/// Stored predecessor reference of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "step_id", rename_all = "snake_case")]
pub enum Dependency {
    #[default]
    None,
    On(Uuid),
}

impl Dependency {
    pub fn predecessor(&self) -> Option<Uuid> {
        match self {
            Dependency::None => None,
            Dependency::On(id) => Some(*id),
        }
    }
}

/// One stage (micro task) of a macro task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub macro_task_id: Uuid,
    /// Kind of work, e.g. "design" or "review".
    pub function: String,
    pub assignee: Option<WorkerId>,
    pub status: StepStatus,
    pub weight: u32,
    pub position: u32,
    pub dependency: Dependency,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn new(
        macro_task_id: Uuid,
        position: u32,
        function: String,
        assignee: WorkerId,
        dependency: Dependency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            macro_task_id,
            function,
            assignee: Some(assignee),
            status: StepStatus::Pending,
            weight: 1,
            position,
            dependency,
            tags: Vec::new(),
            priority: Priority::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_assigned_to(&self, worker: &str) -> bool {
        self.assignee.as_deref() == Some(worker)
    }
}

/// A unit of client-facing work owning an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroTask {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub drive_link: Option<String>,
    pub deadline: NaiveDate,
    pub priority: Priority,
    /// Free-form status, independent of the step statuses.
    pub status: String,
    /// Cached progress; the aggregator's computation is authoritative.
    pub progress: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MacroTask {
    pub fn new(title: String, deadline: NaiveDate, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            description: None,
            drive_link: None,
            deadline,
            priority,
            status: "open".to_string(),
            progress: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial edit of a macro task's own fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacroTaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub drive_link: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub status: Option<String>,
}

impl MacroTaskPatch {
    pub fn apply(self, task: &mut MacroTask) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = Some(description);
        }
        if let Some(link) = self.drive_link {
            task.drive_link = Some(link);
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = Utc::now();
    }
}

/// Action tag of an audit entry and of the matching event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Created,
    Started,
    Completed,
    Returned,
    Blocked,
    Unblocked,
}

impl StepAction {
    /// Past-tense verb used in human descriptions.
    pub fn verb(&self) -> &'static str {
        match self {
            StepAction::Created => "created",
            StepAction::Started => "started",
            StepAction::Completed => "completed",
            StepAction::Returned => "returned",
            StepAction::Blocked => "blocked",
            StepAction::Unblocked => "unblocked",
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Append-only audit record of an accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub step_id: Uuid,
    pub macro_task_id: Uuid,
    /// `None` means the system acted.
    pub actor: Option<WorkerId>,
    pub target: Option<WorkerId>,
    pub action: StepAction,
    /// Only ever set for `returned`.
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    fn base(step: &Step, action: StepAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step.id,
            macro_task_id: step.macro_task_id,
            actor: None,
            target: None,
            action,
            reason: None,
            at: Utc::now(),
        }
    }

    /// Entry written by the engine itself (creation, blocking, unblocking).
    pub fn system(step: &Step, action: StepAction) -> Self {
        Self::base(step, action)
    }

    pub fn by(step: &Step, action: StepAction, actor: &str) -> Self {
        debug_assert!(action != StepAction::Returned, "use LogEntry::returned");
        Self {
            actor: Some(actor.to_string()),
            ..Self::base(step, action)
        }
    }

    pub fn returned(step: &Step, from: &str, to: &str, reason: &str) -> Self {
        Self {
            actor: Some(from.to_string()),
            target: Some(to.to_string()),
            reason: Some(reason.trim().to_string()),
            ..Self::base(step, StepAction::Returned)
        }
    }

    /// Human-readable line for the activity feed.
    ///
    /// `name_of` maps a worker id to a display name.
    pub fn describe(&self, function: &str, name_of: impl Fn(&str) -> String) -> String {
        let actor = self
            .actor
            .as_deref()
            .map(&name_of)
            .unwrap_or_else(|| "system".to_string());
        match (self.action, self.target.as_deref(), self.reason.as_deref()) {
            (StepAction::Returned, Some(target), Some(reason)) => format!(
                "{actor} returned step \"{function}\" to {}: {reason}",
                name_of(target)
            ),
            (StepAction::Blocked, ..) => {
                format!("step \"{function}\" is waiting on its dependency")
            }
            (StepAction::Unblocked, ..) => format!("step \"{function}\" is ready to start"),
            (action, ..) => format!("{actor} {} step \"{function}\"", action.verb()),
        }
    }
}
