use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flare_core::admin::{AdminApi, AdminCli, AdminResponse};
use flare_core::config::ServerConfig;
use flare_core::context::PeerContext;
use flare_core::controller::{ClientLivenessView, CompletionStatus, Controller};
use flare_core::job::{InMemoryJobStore, Job, JobStore};
use flare_core::logger;
use flare_core::resource::{Allocation, ResourceRequest};
use flare_core::runner::{JobLogic, JobRunner, SiteOps};
use flare_core::scheduler::{JobScheduler, ResourceFanout};

/// Stands in for the concrete learning-algorithm controller logic a
/// real deployment would plug in (spec.md §1 Non-goals: "concrete
/// learning algorithms").
struct NoopJobLogic;

#[async_trait::async_trait]
impl JobLogic for NoopJobLogic {
    async fn run(&self, _controller: Arc<Controller>) -> CompletionStatus {
        CompletionStatus::Completed
    }
}

/// Stands in for the out-of-scope wire transport (spec.md §1): without a
/// real network, no client is ever reachable.
struct UnreachableEverywhere;

#[async_trait::async_trait]
impl ResourceFanout for UnreachableEverywhere {
    async fn check_resources(&self, _site: &str, _req: &ResourceRequest, _timeout: Duration) -> Option<(bool, String)> {
        None
    }
    async fn cancel_resources(&self, _site: &str, _token: &str) {}
}

#[async_trait::async_trait]
impl SiteOps for UnreachableEverywhere {
    async fn deploy(&self, _site: &str, _app_name: &str, _job: &Job, _content: &[u8], _timeout: Duration) -> bool {
        false
    }
    async fn allocate_and_start(&self, _site: &str, _token: &str, _timeout: Duration) -> Option<Allocation> {
        None
    }
    async fn stop_and_free(&self, _site: &str, _allocation: Option<&Allocation>) {}
}

struct NoLiveClients;

#[async_trait::async_trait]
impl ClientLivenessView for NoLiveClients {
    async fn get_client_disconnect_time(&self, _name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
}

#[tokio::main]
async fn main() {
    logger::init();
    log::info!("Logger initialized. Starting admin client.");

    let cli = AdminCli::parse();
    let config = ServerConfig::default();

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        Arc::new(JobScheduler::new(config.max_concurrent_jobs, config.client_req_timeout())),
        Arc::new(UnreachableEverywhere),
        Arc::new(UnreachableEverywhere),
        Arc::new(NoopJobLogic),
        Arc::new(NoLiveClients),
        config.client_req_timeout(),
        config.client_req_timeout(),
        config.default_task_fetch_interval(),
    ));
    let admin = AdminApi::new(store, runner);
    let submitter = PeerContext::new(std::env::var("USER").unwrap_or_else(|_| "admin".to_string()));

    match admin.execute(cli.command, &submitter).await {
        Ok(AdminResponse::JobSubmitted { job_id }) => println!("submitted job {}", job_id),
        Ok(AdminResponse::JobList(jobs)) => {
            for job in jobs {
                println!("{}\t{}\t{:?}\t{}", job.job_id, job.name, job.status, job.submit_time);
            }
        }
        Ok(AdminResponse::Ack) => println!("ok"),
        Ok(AdminResponse::JobBlob(bytes)) => println!("{} bytes", bytes.len()),
        Ok(AdminResponse::DownloadUrl(url)) => println!("{}", url),
        Err(e) => {
            log::error!("admin command failed: {}.", e);
            std::process::exit(1);
        }
    }
}
