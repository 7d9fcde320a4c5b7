pub mod commands;
pub mod layout;

pub use commands::{AdminApi, AdminCli, AdminCommand, AdminResponse, JobSummary};
pub use layout::{parse_job_folder, JobMeta};
