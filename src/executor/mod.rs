pub mod executor;

pub use executor::{Executor, ExecutorOutcome, ExecutorRuntime, TaskSource, CATCH_ALL_TASK_NAME};
