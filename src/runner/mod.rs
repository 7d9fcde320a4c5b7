pub mod runner;

pub use runner::{JobLogic, JobRunner, SiteOps};
