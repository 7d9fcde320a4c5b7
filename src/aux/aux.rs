//! C8 — Aux Messaging (spec.md §4.8). A topic-addressed request/reply
//! bus available to controllers, executors, and admin handlers, built
//! directly on top of the `Cell` abstraction (`crate::rpc`) rather than
//! introducing a second transport: aux traffic and task traffic share
//! the same mailbox/actor-loop machinery, matching the teacher's single
//! `VrmMessage` envelope carrying every kind of inter-component chatter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;

use crate::context::RunContext;
use crate::rpc::{Cell, TopicHandler};
use crate::shareable::Shareable;

/// A per-component aux topic handler. Handlers must be non-blocking or
/// spawn their own work (spec.md §4.8), matching `TopicHandler`'s
/// contract on `Cell` directly.
#[async_trait]
pub trait AuxHandler: Send + Sync {
    async fn handle(&self, from: &str, topic: &str, msg: Shareable, ctx: &RunContext) -> Shareable;
}

/// Adapts an `AuxHandler` (which wants the originating topic and a
/// `RunContext`) onto the `Cell`'s plain `TopicHandler` contract, which
/// only carries `from` and the message.
struct AuxTopicAdapter {
    topic: String,
    ctx: RunContext,
    handler: Arc<dyn AuxHandler>,
}

#[async_trait]
impl TopicHandler for AuxTopicAdapter {
    async fn handle(&self, from: &str, msg: Shareable) -> Shareable {
        self.handler.handle(from, &self.topic, msg, &self.ctx).await
    }
}

/// Sends `payload` to every target under `topic`, fanning out in
/// parallel. A missing or late reply surfaces as `None` in the result
/// map rather than as an error for the whole call (spec.md §4.8:
/// "Replies are Shareables; missing/late replies surface as nil in the
/// reply map, not exceptions").
pub async fn send(cell: &dyn Cell, targets: &[String], topic: &str, payload: Shareable, timeout: Duration) -> HashMap<String, Option<Shareable>> {
    let replies = futures::future::join_all(targets.iter().map(|target| {
        let payload = payload.clone();
        async move {
            let reply = match cell.call(target, topic, payload, timeout).await {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!("Aux send to '{}' on topic '{}' did not complete: {}.", target, topic, e);
                    None
                }
            };
            (target.clone(), reply)
        }
    }))
    .await;

    replies.into_iter().collect()
}

/// Registers `handler` under `topic` on `cell`, scoped to a single run
/// so the handler can stamp replies with the right job id.
pub fn register(cell: &dyn Cell, topic: &str, ctx: RunContext, handler: Arc<dyn AuxHandler>) {
    cell.register_handler(topic, Arc::new(AuxTopicAdapter { topic: topic.to_string(), ctx, handler }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PeerContext;
    use crate::rpc::CellBus;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl AuxHandler for Doubler {
        async fn handle(&self, _from: &str, _topic: &str, msg: Shareable, _ctx: &RunContext) -> Shareable {
            let n = msg.payload().as_i64().unwrap_or(0);
            Shareable::new(json!(n * 2))
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("job-1", PeerContext::new("server"))
    }

    #[tokio::test]
    async fn send_fans_out_and_collects_replies() {
        let bus = CellBus::new();
        let server = bus.create_cell("server").await;
        let a = bus.create_cell("A").await;
        let b = bus.create_cell("B").await;
        register(&a, "double", ctx(), Arc::new(Doubler));
        register(&b, "double", ctx(), Arc::new(Doubler));
        tokio::task::yield_now().await;

        let replies = send(&server, &["A".to_string(), "B".to_string()], "double", Shareable::new(json!(21)), Duration::from_millis(200)).await;
        assert_eq!(replies.get("A").unwrap().as_ref().unwrap().payload(), &json!(42));
        assert_eq!(replies.get("B").unwrap().as_ref().unwrap().payload(), &json!(42));
    }

    #[tokio::test]
    async fn unreachable_target_surfaces_as_none_not_an_error() {
        let bus = CellBus::new();
        let server = bus.create_cell("server").await;

        let replies = send(&server, &["ghost".to_string()], "double", Shareable::new(json!(1)), Duration::from_millis(50)).await;
        assert_eq!(replies.len(), 1);
        assert!(replies.get("ghost").unwrap().is_none());
    }
}
