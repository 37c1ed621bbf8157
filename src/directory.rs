//! Identity and roles provider consumed by the engine's guards.
//!
//! The engine never authenticates anyone: it only asks the directory whether
//! a worker exists, is active and holds a function. [`StaticDirectory`] is a
//! fixed list, typically loaded from the `[[workers]]` table of `esteira.toml`.

use serde::{Deserialize, Serialize};

use crate::workflow::WorkerId;

/// A worker known to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    /// Functions (roles) this worker may perform, e.g. "design".
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Worker {
    pub fn new(id: &str, name: &str, functions: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            functions: functions.iter().map(|f| f.to_string()).collect(),
            active: true,
        }
    }

    pub fn performs(&self, function: &str) -> bool {
        self.functions
            .iter()
            .any(|f| f.trim().eq_ignore_ascii_case(function.trim()))
    }
}

pub trait Directory: Send + Sync {
    fn worker(&self, id: &str) -> Option<Worker>;

    /// Active workers holding `function`.
    fn workers_for(&self, function: &str) -> Vec<Worker>;

    fn is_qualified(&self, id: &str, function: &str) -> bool {
        self.worker(id)
            .is_some_and(|w| w.active && w.performs(function))
    }

    /// Display name, falling back to the raw id for unknown workers.
    fn display_name(&self, id: &str) -> String {
        self.worker(id)
            .map(|w| w.name)
            .unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    workers: Vec<Worker>,
}

impl StaticDirectory {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Directory for StaticDirectory {
    fn worker(&self, id: &str) -> Option<Worker> {
        self.workers.iter().find(|w| w.id == id).cloned()
    }

    fn workers_for(&self, function: &str) -> Vec<Worker> {
        self.workers
            .iter()
            .filter(|w| w.active && w.performs(function))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticDirectory {
        let mut inactive = Worker::new("dora", "Dora", &["design"]);
        inactive.active = false;
        StaticDirectory::new(vec![
            Worker::new("ana", "Ana", &["design"]),
            Worker::new("bruno", "Bruno", &["review", "Design"]),
            inactive,
        ])
    }

    #[test]
    fn workers_for_skips_inactive_and_ignores_case() {
        let dir = directory();
        let ids: Vec<String> = dir.workers_for("design").into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["ana", "bruno"]);
    }

    #[test]
    fn qualification_requires_active_worker_with_function() {
        let dir = directory();
        assert!(dir.is_qualified("bruno", "review"));
        assert!(!dir.is_qualified("ana", "review"));
        assert!(!dir.is_qualified("dora", "design"));
        assert!(!dir.is_qualified("nobody", "design"));
    }

    #[test]
    fn len_counts_inactive_workers_too() {
        assert_eq!(directory().len(), 3);
        assert!(StaticDirectory::default().is_empty());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let dir = directory();
        assert_eq!(dir.display_name("ana"), "Ana");
        assert_eq!(dir.display_name("ghost"), "ghost");
    }

    #[test]
    fn worker_deserializes_with_defaults() {
        let worker: Worker = toml::from_str(
            r#"
            id = "ana"
            name = "Ana"
        "#,
        )
        .unwrap();
        assert!(worker.active);
        assert!(worker.functions.is_empty());
    }
}
