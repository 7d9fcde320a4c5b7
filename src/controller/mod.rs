pub mod controller;
pub mod task;

pub use controller::{ClientLivenessView, Controller, TaskAssignment};
pub use task::{CompletionStatus, SendOrder};
