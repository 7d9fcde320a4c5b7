//! C4 data model (spec.md §3 "Job"). Grounded in the teacher's
//! `Reservation`/`ReservationState` split (`reservation/reservation.rs`):
//! a plain data struct plus a status enum whose legal transitions are a
//! DAG, checked explicitly rather than left to convention.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceRequest;

pub const SERVER_SITE: &str = "server";

/// Lifecycle status (spec.md §3, §4.5). `DISPATCHED -> FINISHED_CANT_SCHEDULE`
/// and `RUNNING -> FINISHED_*` are the only ways out of a non-terminal
/// state; every `FINISHED_*` variant is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Dispatched,
    Running,
    FinishedCompleted,
    FinishedAborted,
    FinishedExecutionException,
    FinishedCantSchedule,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::FinishedCompleted
                | JobStatus::FinishedAborted
                | JobStatus::FinishedExecutionException
                | JobStatus::FinishedCantSchedule
        )
    }

    /// Whether `self -> next` is a legal edge in the status DAG
    /// (spec.md §3 invariants).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Dispatched)
                | (Dispatched, Running)
                | (Dispatched, FinishedCantSchedule)
                | (Running, FinishedCompleted)
                | (Running, FinishedAborted)
                | (Running, FinishedExecutionException)
                // abort can land before a controller ever starts issuing tasks
                | (Dispatched, FinishedAborted)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// app-name -> list of target sites. `server` is a reserved site name
/// that is never resource-checked (spec.md §4.4: "Server resources are
/// assumed unlimited").
pub type DeployMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub deploy_map: DeployMap,
    pub resource_spec: HashMap<String, ResourceRequest>,
    pub min_sites: usize,
    pub required_sites: HashSet<String>,
    pub meta: serde_json::Value,
    pub status: JobStatus,
    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<chrono::Duration>,
    /// Read-only, server-populated audit fields (SPEC_FULL.md §3 supplement).
    pub submitter_name: String,
    pub submitter_org: Option<String>,
    pub clone_of: Option<String>,
}

impl Job {
    /// Every client site in the deploy map, excluding the reserved
    /// `server` entry.
    pub fn client_sites(&self) -> HashSet<String> {
        self.deploy_map.values().flatten().filter(|s| s.as_str() != SERVER_SITE).cloned().collect()
    }
}

/// Shapes `JobStore::list` (SPEC_FULL.md §4.3 supplement), grounded in
/// `nvflare`'s `job_cmds.py` `list_jobs` filters.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub name_prefix: Option<String>,
    pub id_prefix: Option<String>,
    pub statuses: Option<HashSet<JobStatus>>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(prefix) = &self.name_prefix {
            if !job.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !job.job_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&job.status) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_happy_path_transitions() {
        assert!(JobStatus::Submitted.can_transition_to(JobStatus::Dispatched));
        assert!(JobStatus::Dispatched.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::FinishedCompleted));
    }

    #[test]
    fn cant_schedule_only_reachable_from_dispatched() {
        assert!(JobStatus::Dispatched.can_transition_to(JobStatus::FinishedCantSchedule));
        assert!(!JobStatus::Submitted.can_transition_to(JobStatus::FinishedCantSchedule));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::FinishedCantSchedule));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [
            JobStatus::FinishedCompleted,
            JobStatus::FinishedAborted,
            JobStatus::FinishedExecutionException,
            JobStatus::FinishedCantSchedule,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Running));
        }
    }
}
