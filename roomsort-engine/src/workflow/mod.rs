//! Classification workflow
//!
//! The state machine is pure; the step executor drives it from persisted
//! executions, and the scheduler creates them.

pub mod execution;
pub mod executor;
pub mod retry;
pub mod scheduler;
pub mod state_machine;
pub mod steps;

pub use execution::WorkflowExecution;
pub use executor::StepExecutor;
pub use scheduler::{ExecutionScheduler, SqliteScheduler};
pub use state_machine::{
    effect_for, transition, Effect, ExecutionPayload, ExecutionStatus, StepEvent, Transition,
    TransitionError, TransitionPolicy, WorkflowState,
};
pub use steps::{StepContext, StepError};
