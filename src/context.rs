//! C1 — per-job / per-request context: identity, peer properties, and
//! audit ids that accompany a `Shareable` without being part of its wire
//! payload. Grounded in the teacher's DTO identity fields
//! (`api/workflow_dto/client_dto.rs`) plus NVFlare's `FLContext`.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Identity and free-form properties carried by the peer that originated
/// a request — a client submitting a task result, or an admin submitting
/// a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerContext {
    pub peer_name: String,
    pub organization: Option<String>,
    pub props: HashMap<String, Value>,
}

impl PeerContext {
    pub fn new(peer_name: impl Into<String>) -> Self {
        PeerContext { peer_name: peer_name.into(), organization: None, props: HashMap::new() }
    }

    pub fn is_empty_props(&self) -> bool {
        self.props.is_empty()
    }
}

/// Per-job run context: the identity of the job this request belongs to,
/// and a fresh audit id for every request that crosses a suspension
/// point, per spec.md §3 (`audit_event_id` header).
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub submitter: PeerContext,
}

impl RunContext {
    pub fn new(job_id: impl Into<String>, submitter: PeerContext) -> Self {
        RunContext { job_id: job_id.into(), submitter }
    }

    pub fn new_audit_event_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_props_detected() {
        let ctx = PeerContext::new("site-a");
        assert!(ctx.is_empty_props());
    }

    #[test]
    fn audit_ids_are_unique() {
        let a = RunContext::new_audit_event_id();
        let b = RunContext::new_audit_event_id();
        assert_ne!(a, b);
    }
}
