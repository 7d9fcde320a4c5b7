//! C5 — Job Scheduler. Translates `nvflare/apis/impl/job_scheduler.py`'s
//! `DefaultJobScheduler` (`_try_job`/`_check_client_resources`/
//! `_cancel_resources`/`schedule_job`) into the teacher's lock-guarded
//! handle idiom (`scheduler_trait.rs`'s `WorkflowScheduler` holding a
//! `ReservationStore` behind a shared lock, here a `HashSet` of active
//! job ids behind a `std::sync::Mutex` — "the Scheduler holds a single
//! lock protecting its active-job set", spec.md §5).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::job::Job;
use crate::resource::ResourceRequest;

/// What the Job Runner needs to allocate or cancel a reservation on one
/// site once the Scheduler hands a job off (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct DispatchInfo {
    pub resource_requirements: ResourceRequest,
    pub token: String,
}

/// The fan-out port the Scheduler calls through — in production this is
/// the registry's RPC fan-out to each site's `ResourceManager`; in this
/// crate it stands in for the out-of-scope wire transport (SPEC_FULL.md
/// Non-goals) while still enforcing per-site timeouts.
#[async_trait]
pub trait ResourceFanout: Send + Sync {
    /// Returns `None` on timeout or transport error — treated identically
    /// to a non-responsive site (spec.md §4.4 step 2a).
    async fn check_resources(&self, site: &str, req: &ResourceRequest, timeout: Duration) -> Option<(bool, String)>;

    /// Best-effort, fire-and-forget (spec.md §4.4 step 2b).
    async fn cancel_resources(&self, site: &str, token: &str);
}

#[derive(Debug, Default)]
pub struct JobScheduler {
    max_concurrent_jobs: usize,
    client_req_timeout: Duration,
    active: Mutex<HashSet<String>>,
}

impl JobScheduler {
    pub fn new(max_concurrent_jobs: usize, client_req_timeout: Duration) -> Self {
        JobScheduler { max_concurrent_jobs, client_req_timeout, active: Mutex::new(HashSet::new()) }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("scheduler lock poisoned").len()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.lock().expect("scheduler lock poisoned").contains(job_id)
    }

    /// Removes a job from the active set once the Runner has torn it
    /// down (terminal status reached).
    pub fn remove_job(&self, job_id: &str) {
        self.active.lock().expect("scheduler lock poisoned").remove(job_id);
    }

    async fn try_job(&self, job: &Job, live_clients: &HashSet<String>, fanout: &dyn ResourceFanout) -> Option<HashMap<String, DispatchInfo>> {
        let sites_to_check: Vec<&String> = job.resource_spec.keys().filter(|site| live_clients.contains(site.as_str())).collect();

        let checks = futures::future::join_all(sites_to_check.iter().map(|site| {
            let req = &job.resource_spec[site.as_str()];
            async move { (site.to_string(), fanout.check_resources(site, req, self.client_req_timeout).await) }
        }))
        .await;

        let mut ok_sites: HashMap<String, DispatchInfo> = HashMap::new();
        for (site, result) in &checks {
            if let Some((true, token)) = result {
                ok_sites.insert(
                    site.clone(),
                    DispatchInfo { resource_requirements: job.resource_spec[site.as_str()].clone(), token: token.clone() },
                );
            }
        }

        let required_ok = job.required_sites.iter().all(|r| ok_sites.contains_key(r));
        if ok_sites.len() < job.min_sites || !required_ok {
            for (site, info) in &ok_sites {
                fanout.cancel_resources(site, &info.token).await;
            }
            return None;
        }

        Some(ok_sites)
    }

    /// Picks the first candidate (submit_time order) whose resource
    /// reservation across all required/min sites succeeds. Returns
    /// `None` if `max_concurrent_jobs` is already reached or no
    /// candidate can be scheduled this tick (spec.md §4.4).
    pub async fn schedule_job(
        &self,
        candidates: &[Job],
        live_clients: &HashSet<String>,
        fanout: &dyn ResourceFanout,
    ) -> Option<(Job, HashMap<String, DispatchInfo>)> {
        if self.active_count() >= self.max_concurrent_jobs {
            return None;
        }

        for job in candidates {
            if let Some(dispatch_info) = self.try_job(job, live_clients, fanout).await {
                let mut guard = self.active.lock().expect("scheduler lock poisoned");
                guard.insert(job.job_id.clone());
                drop(guard);
                info!("Scheduled job {} onto {} site(s).", job.job_id, dispatch_info.len());
                return Some((job.clone(), dispatch_info));
            } else {
                warn!("Job {} could not be scheduled this tick.", job.job_id);
            }
        }
        None
    }
}
