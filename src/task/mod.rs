//! Task data model.
//!
//! - `state` — status state machine (pending → running ⇄ waiting_for_answer → terminal)
//! - `model` — task record, per-task configuration, pending question metadata

pub mod model;
pub mod state;

pub use model::{
    ApprovalMode, Credentials, PendingQuestion, TaskConfig, TaskOutcome, TaskRecord, TaskUpdate,
};
pub use state::{StateTransition, TaskStatus};
