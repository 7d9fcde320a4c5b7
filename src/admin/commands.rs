//! Admin command surface (spec.md §6). Parsed with `clap` (grounded in
//! the teacher's own `clap`-derived data-loading binary, `src/main.rs`)
//! into the same typed `AdminCommand` the in-process `AdminApi` consumes
//! directly — a future real transport only has to move bytes and hand
//! the parsed enum to `AdminApi::execute`, per SPEC_FULL.md §6.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use crate::admin::layout::{pack_app_content, parse_job_folder};
use crate::context::PeerContext;
use crate::error::{Error, Result};
use crate::job::{Job, JobFilter, JobStatus, JobStore};
use crate::runner::JobRunner;

/// Above this many bytes, `download_job` returns a URL instead of
/// inlining the blob (spec.md §6).
pub const INLINE_DOWNLOAD_THRESHOLD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "flare-admin", about = "Job scheduling and execution control admin client")]
pub struct AdminCli {
    #[command(subcommand)]
    pub command: AdminCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommand {
    SubmitJob { folder: PathBuf },
    ListJobs {
        #[arg(short = 'n', long)]
        name_prefix: Option<String>,
        #[arg(short = 'd', long)]
        detail: bool,
        id_prefix: Option<String>,
    },
    AbortJob { job_id: String },
    AbortTask { job_id: String, client: String },
    DeleteJob { job_id: String },
    CloneJob { job_id: String },
    DownloadJob { job_id: String },
}

#[derive(Debug, Clone)]
pub enum AdminResponse {
    JobSubmitted { job_id: String },
    JobList(Vec<JobSummary>),
    Ack,
    JobBlob(Vec<u8>),
    DownloadUrl(String),
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub submit_time: chrono::DateTime<chrono::Utc>,
    pub duration: Option<chrono::Duration>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        JobSummary { job_id: job.job_id.clone(), name: job.name.clone(), status: job.status, submit_time: job.submit_time, duration: job.duration }
    }
}

/// Executes parsed `AdminCommand`s against the live `JobStore`/`JobRunner`.
/// Every command carries the submitter's identity for audit purposes
/// (spec.md §6); authorization itself is out of scope (Non-goals) beyond
/// this hook receiving the identity that a real authorizer would check.
pub struct AdminApi {
    store: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
}

impl AdminApi {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<JobRunner>) -> Self {
        AdminApi { store, runner }
    }

    pub async fn execute(&self, command: AdminCommand, submitter: &PeerContext) -> Result<AdminResponse> {
        match command {
            AdminCommand::SubmitJob { folder } => self.submit_job(&folder, submitter).await,
            AdminCommand::ListJobs { name_prefix, detail: _, id_prefix } => self.list_jobs(name_prefix, id_prefix).await,
            AdminCommand::AbortJob { job_id } => self.abort_job(&job_id).await,
            AdminCommand::AbortTask { job_id, client } => self.abort_task(&job_id, &client).await,
            AdminCommand::DeleteJob { job_id } => self.delete_job(&job_id).await,
            AdminCommand::CloneJob { job_id } => self.clone_job(&job_id, submitter).await,
            AdminCommand::DownloadJob { job_id } => self.download_job(&job_id).await,
        }
    }

    async fn submit_job(&self, folder: &std::path::Path, submitter: &PeerContext) -> Result<AdminResponse> {
        let meta = parse_job_folder(folder)?;
        let content = pack_app_content(folder, &meta.deploy_map)?;
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            job_id: job_id.clone(),
            name: meta.name,
            deploy_map: meta.deploy_map,
            resource_spec: meta.resource_spec,
            min_sites: meta.min_clients,
            required_sites: meta.required_sites,
            meta: serde_json::Value::Null,
            status: JobStatus::Submitted,
            submit_time: chrono::Utc::now(),
            start_time: None,
            duration: None,
            submitter_name: submitter.peer_name.clone(),
            submitter_org: submitter.organization.clone(),
            clone_of: None,
        };
        self.store.create(job, content).await?;
        info!("Job {} submitted by '{}'.", job_id, submitter.peer_name);
        Ok(AdminResponse::JobSubmitted { job_id })
    }

    async fn list_jobs(&self, name_prefix: Option<String>, id_prefix: Option<String>) -> Result<AdminResponse> {
        let filter = JobFilter { name_prefix, id_prefix, statuses: None };
        let jobs = self.store.list(&filter).await?;
        Ok(AdminResponse::JobList(jobs.iter().map(JobSummary::from).collect()))
    }

    async fn abort_job(&self, job_id: &str) -> Result<AdminResponse> {
        // Idempotent per spec.md §6: aborting an already-terminal job is
        // a silent no-op rather than an error.
        let job = self.store.get(job_id).await?;
        if !job.status.is_terminal() {
            self.runner.abort_job(job_id).await;
        }
        Ok(AdminResponse::Ack)
    }

    async fn abort_task(&self, job_id: &str, client: &str) -> Result<AdminResponse> {
        let _ = self.store.get(job_id).await?;
        self.runner.abort_task(job_id, client).await;
        info!("abort_task requested for job {} client '{}'.", job_id, client);
        Ok(AdminResponse::Ack)
    }

    async fn delete_job(&self, job_id: &str) -> Result<AdminResponse> {
        let job = self.store.get(job_id).await?;
        if matches!(job.status, JobStatus::Dispatched | JobStatus::Running) {
            return Err(Error::Other(format!("job {} cannot be deleted while {}", job_id, job.status)));
        }
        self.store.delete(job_id).await?;
        Ok(AdminResponse::Ack)
    }

    async fn clone_job(&self, job_id: &str, submitter: &PeerContext) -> Result<AdminResponse> {
        let source = self.store.get(job_id).await?;
        let content = self.store.get_content(job_id).await?;
        let new_id = uuid::Uuid::new_v4().to_string();
        let clone = Job {
            job_id: new_id.clone(),
            status: JobStatus::Submitted,
            submit_time: chrono::Utc::now(),
            start_time: None,
            duration: None,
            submitter_name: submitter.peer_name.clone(),
            submitter_org: submitter.organization.clone(),
            clone_of: Some(job_id.to_string()),
            ..source
        };
        self.store.create(clone, content).await?;
        Ok(AdminResponse::JobSubmitted { job_id: new_id })
    }

    async fn download_job(&self, job_id: &str) -> Result<AdminResponse> {
        let content = self.store.get_content(job_id).await?;
        if content.len() > INLINE_DOWNLOAD_THRESHOLD_BYTES {
            Ok(AdminResponse::DownloadUrl(format!("/jobs/{}/download", job_id)))
        } else {
            Ok(AdminResponse::JobBlob(content))
        }
    }
}
