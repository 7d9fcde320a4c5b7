pub mod scheduler;

pub use scheduler::{DispatchInfo, JobScheduler, ResourceFanout};
