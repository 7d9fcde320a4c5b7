//! C4 — Job Store. Repository over job metadata, content blob, and
//! optional workspace output blob (spec.md §4.3). Grounded in the
//! teacher's `reservation/reservation_store.rs` (a name-indexed map
//! behind a single lock), adapted to `tokio::sync::RwLock` since a real
//! persistor backing this trait does I/O — the in-memory reference
//! implementation below just never awaits while holding the guard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::{Job, JobFilter, JobStatus};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
struct JobRecord {
    job: Job,
    content: Vec<u8>,
    workspace_output: Option<Vec<u8>>,
}

/// Durable repository of job definitions, metadata, status, and data
/// blobs (spec.md §4.3). Concrete durable backends are external
/// collaborators per the Non-goals; this trait is the contract a real
/// backend must satisfy.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job, content: Vec<u8>) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Job>;
    async fn get_content(&self, job_id: &str) -> Result<Vec<u8>>;
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;
    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()>;
    async fn set_property(&self, job_id: &str, f: Box<dyn FnOnce(&mut Job) + Send>) -> Result<()>;
    async fn delete(&self, job_id: &str) -> Result<()>;
}

/// In-memory reference `JobStore`, ordered by insertion (which tracks
/// `submit_time` since jobs are only ever appended in submission order).
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    order: Vec<String>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job, content: Vec<u8>) -> Result<()> {
        let mut guard = self.inner.write().await;
        let job_id = job.job_id.clone();
        guard.order.push(job_id.clone());
        guard.records.insert(job_id, JobRecord { job, content, workspace_output: None });
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Job> {
        let guard = self.inner.read().await;
        guard.records.get(job_id).map(|r| r.job.clone()).ok_or_else(|| Error::NotFound(job_id.to_string()))
    }

    async fn get_content(&self, job_id: &str) -> Result<Vec<u8>> {
        let guard = self.inner.read().await;
        guard.records.get(job_id).map(|r| r.content.clone()).ok_or_else(|| Error::NotFound(job_id.to_string()))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let guard = self.inner.read().await;
        Ok(guard
            .order
            .iter()
            .filter_map(|id| guard.records.get(id))
            .map(|r| &r.job)
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut guard = self.inner.write().await;
        let record = guard.records.get_mut(job_id).ok_or_else(|| Error::NotFound(job_id.to_string()))?;
        let from = record.job.status;
        if !from.can_transition_to(status) {
            return Err(Error::InvalidTransition { job_id: job_id.to_string(), from: from.to_string(), to: status.to_string() });
        }
        record.job.status = status;
        Ok(())
    }

    async fn set_property(&self, job_id: &str, f: Box<dyn FnOnce(&mut Job) + Send>) -> Result<()> {
        let mut guard = self.inner.write().await;
        let record = guard.records.get_mut(job_id).ok_or_else(|| Error::NotFound(job_id.to_string()))?;
        f(&mut record.job);
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.records.remove(job_id).is_none() {
            return Err(Error::NotFound(job_id.to_string()));
        }
        guard.order.retain(|id| id != job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::SERVER_SITE;
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet};

    fn sample_job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            name: "demo".to_string(),
            deploy_map: {
                let mut m = Map::new();
                m.insert("app".to_string(), vec![SERVER_SITE.to_string(), "A".to_string()]);
                m
            },
            resource_spec: Map::new(),
            min_sites: 1,
            required_sites: HashSet::new(),
            meta: serde_json::Value::Null,
            status: JobStatus::Submitted,
            submit_time: Utc::now(),
            start_time: None,
            duration: None,
            submitter_name: "alice".to_string(),
            submitter_org: None,
            clone_of: None,
        }
    }

    #[tokio::test]
    async fn list_preserves_submit_order() {
        let store = InMemoryJobStore::new();
        store.create(sample_job("j1"), vec![]).await.unwrap();
        store.create(sample_job("j2"), vec![]).await.unwrap();
        store.create(sample_job("j3"), vec![]).await.unwrap();

        let jobs = store.list(&JobFilter::default()).await.unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(ids, vec!["j1", "j2", "j3"]);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected_without_mutation() {
        let store = InMemoryJobStore::new();
        store.create(sample_job("j1"), vec![]).await.unwrap();
        let err = store.set_status("j1", JobStatus::Running).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let job = store.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Submitted);
    }

    #[tokio::test]
    async fn valid_transition_chain_succeeds() {
        let store = InMemoryJobStore::new();
        store.create(sample_job("j1"), vec![]).await.unwrap();
        store.set_status("j1", JobStatus::Dispatched).await.unwrap();
        store.set_status("j1", JobStatus::Running).await.unwrap();
        store.set_status("j1", JobStatus::FinishedCompleted).await.unwrap();
        let job = store.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::FinishedCompleted);
    }

    #[tokio::test]
    async fn delete_removes_from_listing() {
        let store = InMemoryJobStore::new();
        store.create(sample_job("j1"), vec![]).await.unwrap();
        store.delete("j1").await.unwrap();
        assert!(store.list(&JobFilter::default()).await.unwrap().is_empty());
    }
}
