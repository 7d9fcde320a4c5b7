//! Resource request/allocation value types (spec.md §3 "ResourceRequest").

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// A single resource-kind requirement: a count for a divisible resource
/// (cpu), or a specific-count request against a set resource (gpu ids are
/// chosen by the manager, not the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceRequirement {
    Count(u64),
}

/// Mapping from resource-kind name to its requirement.
pub type ResourceRequest = HashMap<String, ResourceRequirement>;

/// What a successful `allocate_resources` actually consumed: for set
/// resources, the specific ids chosen, so `free_resources` can return
/// exactly those ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub counts: HashMap<String, u64>,
    pub ids: HashMap<String, BTreeSet<u64>>,
}
