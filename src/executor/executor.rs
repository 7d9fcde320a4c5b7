//! C7 — Executor Runtime (spec.md §4.7). The client-side cooperative
//! pull loop: one worker per active job, holding a `task_name ->
//! Executor` registry plus a catch-all `*` entry. Grounded in NVFlare's
//! `private/fed/client/client_runner.py` main loop, re-expressed with the
//! teacher's `HashMap` + `Entry`-style registry (`domain/client.rs`) and
//! the `Signal` cancellation tree already built for this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::context::RunContext;
use crate::controller::TaskAssignment;
use crate::filter::FilterChain;
use crate::return_code::ReturnCode;
use crate::shareable::{headers, Shareable};
use crate::signal::Signal;

pub const CATCH_ALL_TASK_NAME: &str = "*";

/// What an `Executor` hands back. `Unsafe` is the distinguished escape
/// hatch spec.md §4.7 describes: "any Executor raising the distinguished
/// UnsafeJob error poisons the job and forces abort with return code
/// UNSAFE_JOB".
pub enum ExecutorOutcome {
    Result(Shareable),
    Unsafe,
}

/// A unit of client-side work, keyed by task name in the runtime's
/// registry.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task_name: &str, data: Shareable, ctx: &RunContext, abort: &Signal) -> ExecutorOutcome;
}

/// The server-facing half of the task-pull protocol (spec.md §4.6),
/// abstracted so the executor loop doesn't need to depend on
/// `Controller` directly — in production this would be an RPC stub over
/// `crate::rpc::Cell`; in-process callers can hand the runtime an
/// `Arc<Controller>` directly since `Controller` already satisfies this
/// contract.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn get_task_assignment(&self, client: &str) -> TaskAssignment;
    async fn submit_result(&self, client: &str, task_id: &str, result: Shareable);
}

#[async_trait]
impl TaskSource for crate::controller::Controller {
    async fn get_task_assignment(&self, client: &str) -> TaskAssignment {
        crate::controller::Controller::get_task_assignment(self, client).await
    }

    async fn submit_result(&self, client: &str, task_id: &str, result: Shareable) {
        crate::controller::Controller::submit_result(self, client, task_id, result).await
    }
}

pub struct ExecutorRuntime {
    client_name: String,
    job_id: String,
    run_signal: Signal,
    task_source: Arc<dyn TaskSource>,
    executors: HashMap<String, Arc<dyn Executor>>,
    data_filters: FilterChain,
    result_filters: FilterChain,
    current_task_signal: Mutex<Option<Signal>>,
    unsafe_job: AtomicBool,
}

impl ExecutorRuntime {
    pub fn new(client_name: impl Into<String>, job_id: impl Into<String>, run_signal: Signal, task_source: Arc<dyn TaskSource>) -> Self {
        ExecutorRuntime {
            client_name: client_name.into(),
            job_id: job_id.into(),
            run_signal,
            task_source,
            executors: HashMap::new(),
            data_filters: FilterChain::new(),
            result_filters: FilterChain::new(),
            current_task_signal: Mutex::new(None),
            unsafe_job: AtomicBool::new(false),
        }
    }

    pub fn register_executor(&mut self, task_name: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(task_name.into(), executor);
    }

    pub fn set_data_filters(&mut self, filters: FilterChain) {
        self.data_filters = filters;
    }

    pub fn set_result_filters(&mut self, filters: FilterChain) {
        self.result_filters = filters;
    }

    pub fn is_unsafe(&self) -> bool {
        self.unsafe_job.load(Ordering::SeqCst)
    }

    /// Triggers the in-flight task's child signal without tearing down
    /// the run (spec.md §4.7 `abort_task`). A no-op if no task is
    /// currently executing.
    pub async fn abort_current_task(&self) {
        if let Some(signal) = self.current_task_signal.lock().await.as_ref() {
            signal.trigger();
        }
    }

    fn lookup_executor(&self, task_name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(task_name).or_else(|| self.executors.get(CATCH_ALL_TASK_NAME)).cloned()
    }

    /// Runs the pull loop until `END_RUN` or the run signal fires.
    /// Single cooperative worker per job, matching spec.md §5.
    pub async fn run(&self, peer_ctx_provider: impl Fn() -> RunContext) {
        loop {
            if self.run_signal.triggered() {
                info!("Run signal triggered for job {}; executor loop exiting.", self.job_id);
                return;
            }

            match self.task_source.get_task_assignment(&self.client_name).await {
                TaskAssignment::EndRun => {
                    info!("Received END_RUN for job {}; executor loop exiting.", self.job_id);
                    return;
                }
                TaskAssignment::TryAgain { wait } => {
                    tokio::time::sleep(wait).await;
                }
                TaskAssignment::Task { task_id, task_name, data } => {
                    let ctx = peer_ctx_provider();
                    let reply = self.process_task(&task_name, data, &ctx).await;
                    self.task_source.submit_result(&self.client_name, &task_id, reply).await;
                }
            }
        }
    }

    /// Runs the full per-task pipeline (spec.md §4.7 steps 3-8) and
    /// returns the reply to post back to the server.
    async fn process_task(&self, task_name: &str, data: Shareable, ctx: &RunContext) -> Shareable {
        if ctx.job_id != self.job_id {
            return self.stamp_reply(Shareable::error_reply(ReturnCode::RunMismatch));
        }
        if ctx.submitter.is_empty_props() {
            return self.stamp_reply(Shareable::error_reply(ReturnCode::MissingPeerContext));
        }

        let data = match self.data_filters.apply(data, ctx).await {
            Ok(data) => data,
            Err(crate::error::Error::Unsafe(msg)) => return self.poison_run(task_name, &msg),
            Err(e) => {
                warn!("Task-data filter rejected task '{}': {}.", task_name, e);
                return self.stamp_reply(Shareable::error_reply(ReturnCode::TaskDataFilterError));
            }
        };

        let executor = match self.lookup_executor(task_name) {
            Some(e) => e,
            None => {
                warn!("No executor registered for task '{}'.", task_name);
                return self.stamp_reply(Shareable::error_reply(ReturnCode::TaskUnknown));
            }
        };

        let task_signal = self.run_signal.child();
        *self.current_task_signal.lock().await = Some(task_signal.clone());
        let outcome = executor.execute(task_name, data, ctx, &task_signal).await;
        *self.current_task_signal.lock().await = None;

        if task_signal.triggered() {
            return self.stamp_reply(Shareable::error_reply(ReturnCode::TaskAborted));
        }

        let result = match outcome {
            ExecutorOutcome::Unsafe => return self.poison_run(task_name, "executor raised UnsafeJob"),
            ExecutorOutcome::Result(result) => result,
        };

        match self.result_filters.apply(result, ctx).await {
            Ok(result) => self.stamp_reply(result),
            Err(crate::error::Error::Unsafe(msg)) => self.poison_run(task_name, &msg),
            Err(e) => {
                warn!("Task-result filter rejected task '{}': {}.", task_name, e);
                self.stamp_reply(Shareable::error_reply(ReturnCode::TaskResultFilterError))
            }
        }
    }

    /// Poisons the run the way both an `ExecutorOutcome::Unsafe` and a
    /// filter's `Error::Unsafe` do: sets the sticky unsafe flag, triggers
    /// the run signal, and replies `UNSAFE_JOB` (spec.md §4.7).
    fn poison_run(&self, task_name: &str, reason: &str) -> Shareable {
        self.unsafe_job.store(true, Ordering::SeqCst);
        self.run_signal.trigger();
        warn!("Task '{}' poisoned the run as unsafe: {}.", task_name, reason);
        self.stamp_reply(Shareable::error_reply(ReturnCode::UnsafeJob))
    }

    fn stamp_reply(&self, mut reply: Shareable) -> Shareable {
        reply.set_header(headers::AUDIT_EVENT_ID, RunContext::new_audit_event_id());
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PeerContext;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct FakeTaskSource {
        queue: StdMutex<Vec<(String, String, Shareable)>>,
        submitted: StdMutex<Vec<(String, Shareable)>>,
    }

    #[async_trait]
    impl TaskSource for FakeTaskSource {
        async fn get_task_assignment(&self, _client: &str) -> TaskAssignment {
            let mut guard = self.queue.lock().unwrap();
            if let Some((task_id, task_name, data)) = guard.pop() {
                TaskAssignment::Task { task_id, task_name, data }
            } else {
                TaskAssignment::EndRun
            }
        }

        async fn submit_result(&self, _client: &str, task_id: &str, result: Shareable) {
            self.submitted.lock().unwrap().push((task_id.to_string(), result));
        }
    }

    struct Doubler;

    #[async_trait]
    impl Executor for Doubler {
        async fn execute(&self, _task_name: &str, data: Shareable, _ctx: &RunContext, _abort: &Signal) -> ExecutorOutcome {
            let n = data.payload().as_i64().unwrap_or(0);
            ExecutorOutcome::Result(Shareable::new(json!(n * 2)))
        }
    }

    struct RaisesUnsafe;

    #[async_trait]
    impl Executor for RaisesUnsafe {
        async fn execute(&self, _task_name: &str, _data: Shareable, _ctx: &RunContext, _abort: &Signal) -> ExecutorOutcome {
            ExecutorOutcome::Unsafe
        }
    }

    fn ctx() -> RunContext {
        let mut peer = PeerContext::new("client-a");
        peer.props.insert("site".to_string(), json!("A"));
        RunContext::new("job-1", peer)
    }

    fn runtime(executors: Vec<(&str, Arc<dyn Executor>)>, tasks: Vec<(&str, &str, Shareable)>) -> (ExecutorRuntime, Arc<FakeTaskSource>) {
        let source = Arc::new(FakeTaskSource {
            queue: StdMutex::new(tasks.into_iter().map(|(id, name, data)| (id.to_string(), name.to_string(), data)).rev().collect()),
            submitted: StdMutex::new(vec![]),
        });
        let mut rt = ExecutorRuntime::new("client-a", "job-1", Signal::new(), source.clone());
        for (name, ex) in executors {
            rt.register_executor(name, ex);
        }
        (rt, source)
    }

    #[tokio::test]
    async fn happy_path_runs_executor_and_submits_result() {
        let (rt, source) = runtime(vec![("double", Arc::new(Doubler))], vec![("t1", "double", Shareable::new(json!(21)))]);
        rt.run(ctx).await;
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1.payload(), &json!(42));
    }

    #[tokio::test]
    async fn unknown_task_name_replies_task_unknown() {
        let (rt, source) = runtime(vec![], vec![("t1", "nope", Shareable::new(json!(1)))]);
        rt.run(ctx).await;
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted[0].1.return_code(), ReturnCode::TaskUnknown);
    }

    #[tokio::test]
    async fn mismatched_run_mismatch_context_is_rejected() {
        let (rt, source) = runtime(vec![("double", Arc::new(Doubler))], vec![("t1", "double", Shareable::new(json!(1)))]);
        let other_job_ctx = || RunContext::new("some-other-job", ctx().submitter);
        rt.run(other_job_ctx).await;
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted[0].1.return_code(), ReturnCode::RunMismatch);
    }

    #[tokio::test]
    async fn unsafe_outcome_triggers_abort_and_sets_flag() {
        let (rt, source) = runtime(vec![("bad", Arc::new(RaisesUnsafe))], vec![("t1", "bad", Shareable::new(json!(1)))]);
        rt.run(ctx).await;
        assert!(rt.is_unsafe());
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted[0].1.return_code(), ReturnCode::UnsafeJob);
    }

    struct UnsafeDataFilter;

    #[async_trait]
    impl crate::filter::Filter for UnsafeDataFilter {
        async fn process(&self, _shareable: Shareable, _ctx: &RunContext) -> crate::error::Result<Shareable> {
            Err(crate::error::Error::Unsafe("poisoned payload detected".to_string()))
        }
    }

    #[tokio::test]
    async fn filter_signaled_unsafe_poisons_the_run_like_an_executor_would() {
        let (mut rt, source) = runtime(vec![("double", Arc::new(Doubler))], vec![("t1", "double", Shareable::new(json!(1)))]);
        let mut filters = FilterChain::new();
        filters.add_task_filter(Arc::new(UnsafeDataFilter));
        rt.set_data_filters(filters);

        rt.run(ctx).await;
        assert!(rt.is_unsafe());
        let submitted = source.submitted.lock().unwrap();
        assert_eq!(submitted[0].1.return_code(), ReturnCode::UnsafeJob);
    }
}
