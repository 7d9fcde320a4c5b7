//! Wire-safe return codes (spec.md §7). These cross the controller/executor
//! boundary on every reply; unlike `crate::error::Error` they are data, not
//! a Rust error type, and are never the `E` side of a suspension-point
//! `Result`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    TaskUnknown,
    TaskAborted,
    TaskDataFilterError,
    TaskResultFilterError,
    ExecutionException,
    ExecutionResultError,
    UnsafeJob,
    BadTaskData,
    BadPeerContext,
    MissingPeerContext,
    RunMismatch,
    CommunicationError,
    ServiceUnavailable,
}

impl ReturnCode {
    /// Whether a reply carrying this code counts toward a task's
    /// `min_responses`, per spec.md §4.6: only `Ok` results count.
    pub fn counts_toward_min_responses(self) -> bool {
        matches!(self, ReturnCode::Ok)
    }

    pub fn is_error(self) -> bool {
        !matches!(self, ReturnCode::Ok)
    }
}

impl Default for ReturnCode {
    fn default() -> Self {
        ReturnCode::Ok
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
