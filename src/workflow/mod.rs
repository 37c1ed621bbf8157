mod progress;
mod resolver;
mod state;
mod step;

pub use progress::progress;
pub use resolver::DependencyResolver;
pub use state::{Guard, Operation, StateMachine, Transition};
pub use step::{
    Dependency, DisplayStatus, LogEntry, MacroTask, MacroTaskPatch, Priority, Step, StepAction,
    StepStatus, WorkerId,
};
