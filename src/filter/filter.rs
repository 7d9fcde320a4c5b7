//! C10 — Filter Chain. A single `process` operation applied in a fixed,
//! deterministic order on both the outgoing (task data) and incoming
//! (task result) path: scope-level filters before task-level filters on
//! both paths (spec.md §4.9, decided for the result path in SPEC_FULL.md
//! §4.9). Grounded in NVFlare's `apis/utils/task_utils.py`
//! `apply_filters`, expressed here as a trait object chain rather than a
//! list of callables, matching the teacher's preference for trait
//! objects over closures at component seams (`traits.rs`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::Result;
use crate::shareable::Shareable;

/// A single transformation step. `process` may reject the message with an
/// ordinary `Err`, or poison the run by returning `Err(Error::Unsafe(_))`
/// (spec.md §4.7: "A filter may mark the job as unsafe, which aborts the
/// run") — the caller driving the chain is responsible for recognizing
/// that variant and routing it through the same unsafe-job path an
/// `Executor`'s `ExecutorOutcome::Unsafe` takes.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn process(&self, shareable: Shareable, ctx: &RunContext) -> Result<Shareable>;

    /// A short name for logging; defaults to the Rust type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An ordered chain: every scope-level filter runs before every
/// task-level filter, in registration order within each group. The same
/// ordering is applied whether the chain is processing outgoing task
/// data or incoming task results (spec.md §4.9 / SPEC_FULL.md §4.9).
#[derive(Clone, Default)]
pub struct FilterChain {
    scope_filters: Vec<Arc<dyn Filter>>,
    task_filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scope_filter(&mut self, filter: Arc<dyn Filter>) {
        self.scope_filters.push(filter);
    }

    pub fn add_task_filter(&mut self, filter: Arc<dyn Filter>) {
        self.task_filters.push(filter);
    }

    /// Runs every filter in order, feeding each filter's output to the
    /// next. Returns the first error encountered, without running the
    /// remaining filters (spec.md: "A filter may not reorder or
    /// duplicate messages" — a short-circuit on error preserves that).
    pub async fn apply(&self, mut shareable: Shareable, ctx: &RunContext) -> Result<Shareable> {
        for filter in self.scope_filters.iter().chain(self.task_filters.iter()) {
            shareable = filter.process(shareable, ctx).await?;
        }
        Ok(shareable)
    }

    pub fn is_empty(&self) -> bool {
        self.scope_filters.is_empty() && self.task_filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PeerContext;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        label: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Filter for Recording {
        async fn process(&self, shareable: Shareable, _ctx: &RunContext) -> Result<Shareable> {
            self.order.lock().unwrap().push(self.label);
            Ok(shareable)
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Filter for Rejecting {
        async fn process(&self, _shareable: Shareable, _ctx: &RunContext) -> Result<Shareable> {
            Err(crate::error::Error::Other("rejected".to_string()))
        }
    }

    struct CountingPassthrough(Arc<AtomicUsize>);

    #[async_trait]
    impl Filter for CountingPassthrough {
        async fn process(&self, shareable: Shareable, _ctx: &RunContext) -> Result<Shareable> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(shareable)
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("job-1", PeerContext::new("server"))
    }

    #[tokio::test]
    async fn scope_filters_run_before_task_filters() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = FilterChain::new();
        chain.add_task_filter(Arc::new(Recording { label: "task", order: order.clone() }));
        chain.add_scope_filter(Arc::new(Recording { label: "scope", order: order.clone() }));

        chain.apply(Shareable::new(json!(null)), &ctx()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["scope", "task"]);
    }

    #[tokio::test]
    async fn rejection_short_circuits_remaining_filters() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain.add_scope_filter(Arc::new(Rejecting));
        chain.add_task_filter(Arc::new(CountingPassthrough(counter.clone())));

        let err = chain.apply(Shareable::new(json!(null)), &ctx()).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Other(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_passes_through_unchanged() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        let input = Shareable::new(json!({"x": 1}));
        let output = chain.apply(input.clone(), &ctx()).await.unwrap();
        assert_eq!(input, output);
    }
}
