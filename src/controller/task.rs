//! Controller task bookkeeping types (spec.md §4.6). Grounded in
//! NVFlare's `apis/impl/controller.py` `Task`/`TaskCompletionStatus` and
//! translated into the teacher's preference for small `Copy` enums at
//! component seams.

use std::collections::{HashMap, HashSet};

use crate::shareable::Shareable;

/// How `Controller::send` and `Controller::relay` pick a target
/// (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOrder {
    Sequential,
    Any,
}

/// Why a task stopped accepting new assignments/results (spec.md §4.6).
/// `ExecutionException` is the job-level outcome a `JobLogic`
/// implementation reports when a task fails via executor/filter error
/// rather than timeout or operator abort (spec.md §3 return-code table:
/// "EXECUTION_EXCEPTION — executor raised a non-safety exception").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Timeout,
    Cancelled,
    ExecutionException,
}

/// Server-side bookkeeping for one in-flight task. Not `pub` outside the
/// controller module: callers only ever see `task_id`s and results.
#[derive(Debug)]
pub(super) struct TaskState {
    pub name: String,
    pub targets: Vec<String>,
    pub data: Shareable,
    pub min_responses: usize,
    /// Clients that have been handed an assignment for this task_id —
    /// distinguishes "never offered" from "offered, no result yet".
    pub pulled_by: HashSet<String>,
    pub results: HashMap<String, Shareable>,
    pub completion_status: Option<CompletionStatus>,
}

impl TaskState {
    pub fn new(name: String, targets: Vec<String>, data: Shareable, min_responses: usize) -> Self {
        TaskState { name, targets, data, min_responses, pulled_by: HashSet::new(), results: HashMap::new(), completion_status: None }
    }

    pub fn is_terminated(&self) -> bool {
        self.completion_status.is_some()
    }

    /// Number of results whose return_code counts toward `min_responses`
    /// (spec.md §4.6: "only results whose return_code is OK").
    pub fn ok_response_count(&self) -> usize {
        self.results.values().filter(|r| r.return_code().counts_toward_min_responses()).count()
    }

    pub fn is_eligible_for(&self, client: &str) -> bool {
        !self.is_terminated() && self.targets.iter().any(|t| t == client) && !self.results.contains_key(client)
    }
}
