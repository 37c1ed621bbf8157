//! Workflow execution engine for macro tasks split into dependent steps.
//!
//! A macro task owns an ordered list of steps, each assigned to one worker
//! performing one function. [`engine::WorkflowEngine`] creates workflows and
//! drives steps through `pendente → em_execucao → concluida`, with the
//! `devolvida` detour for returning work to another qualified worker. Every
//! accepted transition is audited and published as an event.

pub mod cli;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod notify;
pub mod plan;
pub mod store;
pub mod telemetry;
pub mod ui;
pub mod workflow;

pub use config::EngineConfig;
pub use directory::{Directory, StaticDirectory, Worker};
pub use engine::{MacroTaskView, StageSpec, StepView, WorkflowEngine, WorkflowSpec};
pub use error::{EngineError, Result};
pub use events::Event;
pub use store::{InMemoryStore, StepStore};
