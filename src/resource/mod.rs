pub mod manager;
pub mod request;

pub use manager::{Capacity, ResourceManager};
pub use request::{Allocation, ResourceRequest, ResourceRequirement};
