//! C6 — Controller Runtime (spec.md §4.6). The server-side driver of a
//! single running job: owns the task-pull protocol and the four
//! orchestration primitives (`broadcast`/`send`/`relay`/`cancel_*`).
//! Grounded in NVFlare's `apis/impl/controller.py`, re-expressed with the
//! teacher's single-lock-per-resource discipline (spec.md §5: "per-task
//! lock while updating response tallies, per-job lock while updating
//! standing-tasks") via one `tokio::sync::RwLock<HashMap<task_id, ...>>`
//! plus an `AtomicUsize` standing-task counter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use super::task::{CompletionStatus, SendOrder, TaskState};
use crate::return_code::ReturnCode;
use crate::shareable::Shareable;
use crate::signal::Signal;

/// What `get_task_assignment` hands back to a polling client
/// (spec.md §4.6).
#[derive(Debug, Clone)]
pub enum TaskAssignment {
    Task { task_id: String, task_name: String, data: Shareable },
    TryAgain { wait: Duration },
    EndRun,
}

/// Lets the Controller answer `get_client_disconnect_time` without
/// depending on `ClientRegistry` directly (SPEC_FULL.md §4.6).
#[async_trait]
pub trait ClientLivenessView: Send + Sync {
    async fn get_client_disconnect_time(&self, name: &str) -> Option<DateTime<Utc>>;
}

pub struct Controller {
    job_id: String,
    abort_signal: Signal,
    tasks: RwLock<HashMap<String, TaskState>>,
    order: RwLock<Vec<String>>,
    notify: Notify,
    standing: AtomicUsize,
    liveness: Arc<dyn ClientLivenessView>,
    default_fetch_interval: Duration,
}

impl Controller {
    pub fn new(job_id: impl Into<String>, abort_signal: Signal, liveness: Arc<dyn ClientLivenessView>, default_fetch_interval: Duration) -> Self {
        Controller {
            job_id: job_id.into(),
            abort_signal,
            tasks: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            notify: Notify::new(),
            standing: AtomicUsize::new(0),
            liveness,
            default_fetch_interval,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The same cancellation node the owning `JobRunner` triggers on
    /// abort or normal completion — clients wire their `ExecutorRuntime`
    /// against this so per-task child signals cascade correctly.
    pub fn abort_signal(&self) -> Signal {
        self.abort_signal.clone()
    }

    pub fn standing_tasks(&self) -> usize {
        self.standing.load(Ordering::SeqCst)
    }

    pub async fn get_client_disconnect_time(&self, client: &str) -> Option<DateTime<Utc>> {
        self.liveness.get_client_disconnect_time(client).await
    }

    async fn insert_task(&self, task: TaskState) -> String {
        let task_id = Uuid::new_v4().to_string();
        self.tasks.write().await.insert(task_id.clone(), task);
        self.order.write().await.push(task_id.clone());
        self.standing.fetch_add(1, Ordering::SeqCst);
        task_id
    }

    async fn terminate(&self, task_id: &str, status: CompletionStatus) {
        let mut guard = self.tasks.write().await;
        if let Some(task) = guard.get_mut(task_id) {
            if task.completion_status.is_none() {
                task.completion_status = Some(status);
                self.standing.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.notify.notify_waiters();
    }

    /// **Task-pull protocol** (spec.md §4.6): the passive half. Returns
    /// the next eligible task for `client`, or a sentinel.
    pub async fn get_task_assignment(&self, client: &str) -> TaskAssignment {
        if self.abort_signal.triggered() {
            return TaskAssignment::EndRun;
        }

        let order = self.order.read().await.clone();
        let mut guard = self.tasks.write().await;
        for task_id in &order {
            if let Some(task) = guard.get_mut(task_id) {
                if task.is_eligible_for(client) {
                    task.pulled_by.insert(client.to_string());
                    return TaskAssignment::Task { task_id: task_id.clone(), task_name: task.name.clone(), data: task.data.clone() };
                }
            }
        }
        TaskAssignment::TryAgain { wait: self.default_fetch_interval }
    }

    /// **Result submission** (spec.md §4.6). Results arriving for a
    /// terminated task are dropped with a logged warning, matching the
    /// teacher's pattern of never panicking on a late/racy event.
    /// Idempotent per client (spec.md §4.6 testable property: submitting
    /// the same (task_id, client) result twice leaves state identical to
    /// submitting once) — a second submission from the same client is
    /// logged and dropped rather than overwriting the first.
    pub async fn submit_result(&self, client: &str, task_id: &str, result: Shareable) {
        let mut guard = self.tasks.write().await;
        match guard.get_mut(task_id) {
            Some(task) if task.results.contains_key(client) => {
                warn!("Duplicate result for task {} from '{}' dropped.", task_id, client);
            }
            Some(task) if !task.is_terminated() => {
                task.results.insert(client.to_string(), result);
                drop(guard);
                self.notify.notify_waiters();
            }
            Some(_) => warn!("Result for terminated task {} from '{}' dropped.", task_id, client),
            None => warn!("Result for unknown task {} from '{}' dropped.", task_id, client),
        }
    }

    pub async fn cancel_task(&self, task_id: &str, status: CompletionStatus) {
        self.terminate(task_id, status).await;
    }

    /// **Single-task abort** (spec.md §4.7 `abort_task` admin command):
    /// cancels every still-outstanding task currently pulled by `client`,
    /// without touching the run signal — the rest of the job, and every
    /// other client, keeps going.
    pub async fn cancel_tasks_for_client(&self, client: &str) {
        let ids: Vec<String> = {
            let guard = self.tasks.read().await;
            guard.iter().filter(|(_, task)| !task.is_terminated() && task.pulled_by.contains(client)).map(|(id, _)| id.clone()).collect()
        };
        if ids.is_empty() {
            warn!("abort_task: client '{}' has no outstanding task.", client);
        }
        for id in ids {
            self.cancel_task(&id, CompletionStatus::Cancelled).await;
        }
    }

    pub async fn cancel_all_tasks(&self, status: CompletionStatus) {
        let ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        for id in ids {
            self.terminate(&id, status).await;
        }
    }

    /// **broadcast** (spec.md §4.6): send to all `targets` in parallel;
    /// completes once `min_responses` OK results arrive (or `timeout`
    /// elapses), then waits up to `wait_after_min_received` more for
    /// stragglers. Targets with no result by then map to `None`.
    pub async fn broadcast(
        &self,
        name: &str,
        data: Shareable,
        targets: Vec<String>,
        min_responses: usize,
        wait_after_min_received: Duration,
        timeout: Duration,
    ) -> HashMap<String, Option<Shareable>> {
        let task = TaskState::new(name.to_string(), targets.clone(), data, min_responses);
        let task_id = self.insert_task(task).await;

        let deadline = tokio::time::Instant::now() + timeout;
        let min_met_at = loop {
            let ok_count = { self.tasks.read().await.get(&task_id).map(|t| t.ok_response_count()).unwrap_or(0) };
            if ok_count >= min_responses {
                break Some(tokio::time::Instant::now());
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => break None,
            }
        };

        if let Some(_met_at) = min_met_at {
            tokio::select! {
                _ = tokio::time::sleep(wait_after_min_received) => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
            self.terminate(&task_id, CompletionStatus::Completed).await;
        } else {
            warn!("Broadcast task {} ({}) timed out waiting for min_responses.", task_id, name);
            self.terminate(&task_id, CompletionStatus::Timeout).await;
        }

        let guard = self.tasks.read().await;
        let task = guard.get(&task_id).expect("task was just terminated, still present");
        targets.into_iter().map(|t| { let r = task.results.get(&t).cloned(); (t, r) }).collect()
    }

    /// **send** (spec.md §4.6): offers the task to one target at a time
    /// (`SEQUENTIAL`) or to every candidate simultaneously and keeps the
    /// first puller (`ANY`); a target that doesn't pull within
    /// `task_assignment_timeout` is skipped. Returns the accepting
    /// target and the task_id to later match a result against, or
    /// `None` if nobody accepted.
    pub async fn send(&self, name: &str, data: Shareable, targets: Vec<String>, order: SendOrder, task_assignment_timeout: Duration) -> Option<(String, String)> {
        match order {
            SendOrder::Sequential => {
                for target in targets {
                    let task = TaskState::new(name.to_string(), vec![target.clone()], data.clone(), 1);
                    let task_id = self.insert_task(task).await;
                    if self.wait_for_pull(&task_id, &target, task_assignment_timeout).await {
                        return Some((target, task_id));
                    }
                    self.terminate(&task_id, CompletionStatus::Timeout).await;
                }
                None
            }
            SendOrder::Any => {
                let task = TaskState::new(name.to_string(), targets.clone(), data, 1);
                let task_id = self.insert_task(task).await;
                let deadline = tokio::time::Instant::now() + task_assignment_timeout;
                loop {
                    let puller = { self.tasks.read().await.get(&task_id).and_then(|t| t.pulled_by.iter().next().cloned()) };
                    if let Some(puller) = puller {
                        self.narrow_to_single_target(&task_id, &puller).await;
                        return Some((puller, task_id));
                    }
                    tokio::select! {
                        _ = self.notify.notified() => continue,
                        _ = tokio::time::sleep_until(deadline) => {
                            self.terminate(&task_id, CompletionStatus::Timeout).await;
                            return None;
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_pull(&self, task_id: &str, target: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.tasks.read().await.get(task_id).map(|t| t.pulled_by.contains(target)).unwrap_or(false) {
                return true;
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }

    async fn narrow_to_single_target(&self, task_id: &str, winner: &str) {
        let mut guard = self.tasks.write().await;
        if let Some(task) = guard.get_mut(task_id) {
            task.targets = vec![winner.to_string()];
        }
    }

    /// Blocks until `task_id` receives a result or `timeout` elapses.
    pub async fn await_result(&self, task_id: &str, timeout: Duration) -> Option<(String, Shareable)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let guard = self.tasks.read().await;
                if let Some(task) = guard.get(task_id) {
                    if let Some((client, result)) = task.results.iter().next() {
                        return Some((client.clone(), result.clone()));
                    }
                    if task.is_terminated() {
                        return None;
                    }
                } else {
                    return None;
                }
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    self.terminate(task_id, CompletionStatus::Timeout).await;
                    return None;
                }
            }
        }
    }

    /// **relay** (spec.md §4.6): a serial pass through `targets`, each
    /// hop receiving the previous hop's result as its input. If
    /// `dynamic_targets` is set, `extra_targets` supplied after a hop
    /// starts are appended to the remaining queue — modeled here by the
    /// caller re-invoking `relay` with a fresh target list sourced from
    /// `dynamic_targets_rx`, since the controller itself has no notion
    /// of "targets discovered mid-flight" without a job-specific signal.
    pub async fn relay(
        &self,
        name: &str,
        initial_data: Shareable,
        targets: Vec<String>,
        order: SendOrder,
        task_assignment_timeout: Duration,
        task_result_timeout: Duration,
    ) -> Vec<(String, Option<Shareable>)> {
        let mut hops = Vec::with_capacity(targets.len());
        let mut current = initial_data;
        let mut remaining = targets;

        while !remaining.is_empty() {
            let candidates = match order {
                SendOrder::Sequential => vec![remaining.remove(0)],
                SendOrder::Any => std::mem::take(&mut remaining),
            };

            match self.send(name, current.clone(), candidates, order, task_assignment_timeout).await {
                Some((accepted, task_id)) => match self.await_result(&task_id, task_result_timeout).await {
                    Some((_, result)) => {
                        current = result.clone();
                        hops.push((accepted, Some(result)));
                    }
                    None => {
                        hops.push((accepted, None));
                        break;
                    }
                },
                None => break,
            }
        }
        hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoDisconnects;

    #[async_trait]
    impl ClientLivenessView for NoDisconnects {
        async fn get_client_disconnect_time(&self, _name: &str) -> Option<DateTime<Utc>> {
            None
        }
    }

    fn controller() -> Controller {
        Controller::new("job-1", Signal::new(), Arc::new(NoDisconnects), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn broadcast_completes_once_min_responses_arrive() {
        let ctl = Arc::new(controller());
        let targets = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let ctl2 = ctl.clone();
        let responder = tokio::spawn(async move {
            loop {
                if let TaskAssignment::Task { task_id, .. } = ctl2.get_task_assignment("A").await {
                    ctl2.submit_result("A", &task_id, Shareable::new(json!("ok"))).await;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        let ctl3 = ctl.clone();
        let responder2 = tokio::spawn(async move {
            loop {
                if let TaskAssignment::Task { task_id, .. } = ctl3.get_task_assignment("B").await {
                    ctl3.submit_result("B", &task_id, Shareable::new(json!("ok"))).await;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = ctl
            .broadcast("t", Shareable::new(json!(null)), targets, 2, Duration::from_millis(20), Duration::from_millis(500))
            .await;
        responder.await.unwrap();
        responder2.await.unwrap();

        assert!(result.get("A").unwrap().is_some());
        assert!(result.get("B").unwrap().is_some());
        assert!(result.get("C").unwrap().is_none());
    }

    #[tokio::test]
    async fn get_task_assignment_returns_end_run_after_abort() {
        let sig = Signal::new();
        let ctl = Controller::new("job-1", sig.clone(), Arc::new(NoDisconnects), Duration::from_millis(20));
        sig.trigger();
        assert!(matches!(ctl.get_task_assignment("A").await, TaskAssignment::EndRun));
    }

    #[tokio::test]
    async fn send_sequential_skips_nonresponsive_target() {
        let ctl = Arc::new(controller());
        let ctl2 = ctl.clone();
        tokio::spawn(async move {
            loop {
                if let TaskAssignment::Task { task_id, .. } = ctl2.get_task_assignment("B").await {
                    let _ = task_id;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let picked = ctl
            .send("t", Shareable::new(json!(null)), vec!["A".to_string(), "B".to_string()], SendOrder::Sequential, Duration::from_millis(50))
            .await;
        assert_eq!(picked.map(|(t, _)| t), Some("B".to_string()));
    }

    #[tokio::test]
    async fn error_results_do_not_count_toward_min_responses() {
        let ctl = Arc::new(controller());
        let ctl2 = ctl.clone();
        tokio::spawn(async move {
            loop {
                if let TaskAssignment::Task { task_id, .. } = ctl2.get_task_assignment("A").await {
                    ctl2.submit_result("A", &task_id, Shareable::error_reply(ReturnCode::ExecutionException)).await;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = ctl
            .broadcast("t", Shareable::new(json!(null)), vec!["A".to_string()], 1, Duration::from_millis(10), Duration::from_millis(80))
            .await;
        assert!(result.get("A").unwrap().is_some());
    }

    #[tokio::test]
    async fn resubmitting_same_client_result_is_a_noop() {
        let ctl = controller();
        let task_id = ctl.insert_task(TaskState::new("t".to_string(), vec!["A".to_string()], Shareable::new(json!(null)), 1)).await;

        ctl.submit_result("A", &task_id, Shareable::new(json!("first"))).await;
        ctl.submit_result("A", &task_id, Shareable::new(json!("second"))).await;

        let guard = ctl.tasks.read().await;
        let task = guard.get(&task_id).unwrap();
        assert_eq!(task.results.len(), 1);
        assert_eq!(task.results.get("A").unwrap().payload(), &json!("first"));
    }

    #[tokio::test]
    async fn cancel_tasks_for_client_only_cancels_that_clients_pulled_task() {
        let ctl = controller();
        let task_a = ctl.insert_task(TaskState::new("t".to_string(), vec!["A".to_string()], Shareable::new(json!(null)), 1)).await;
        let task_b = ctl.insert_task(TaskState::new("t".to_string(), vec!["B".to_string()], Shareable::new(json!(null)), 1)).await;
        assert!(matches!(ctl.get_task_assignment("A").await, TaskAssignment::Task { .. }));
        assert!(matches!(ctl.get_task_assignment("B").await, TaskAssignment::Task { .. }));

        ctl.cancel_tasks_for_client("A").await;

        let guard = ctl.tasks.read().await;
        assert!(guard.get(&task_a).unwrap().is_terminated());
        assert!(!guard.get(&task_b).unwrap().is_terminated());
    }
}
