//! Typed RPC/pub-sub cell (spec.md §1: "the wire-level transport
//! implementation... treated as a typed RPC/pub-sub cell"). Grounded in
//! the teacher's actor-mailbox messaging stack: `vrm_component_registry/
//! registry_client.rs` (a directory of `ComponentId -> Sender`, one
//! actor-loop task per component) and `component_communication/session.rs`
//! (an `Envelope` addressed by `target_id`/`sender_id`). Here the
//! directory is async (`tokio::sync::mpsc` + `oneshot` replies) since
//! every call is an explicit-timeout suspension point (spec.md §5),
//! and the real network driver that would sit behind `Cell` in
//! production is out of scope (SPEC_FULL.md Non-goals) — `LocalCell` is
//! the in-process reference implementation used by every test harness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::error::{Error, Result};
use crate::shareable::Shareable;

/// A per-topic handler registered on a `Cell`. Handlers run on the
/// receiving cell's event loop and must be non-blocking, or spawn their
/// own work and return promptly (spec.md §4.8).
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, from: &str, msg: Shareable) -> Shareable;
}

/// The RPC contract every component (controller, executor, admin handler)
/// calls through to reach another named participant.
#[async_trait]
pub trait Cell: Send + Sync {
    fn name(&self) -> &str;

    /// Request/reply with an explicit timeout — every cross-site call in
    /// this crate is a suspension point (spec.md §5).
    async fn call(&self, target: &str, topic: &str, msg: Shareable, timeout: Duration) -> Result<Shareable>;

    /// Fire-and-forget; used for best-effort cleanup sends (spec.md §4.4
    /// "best-effort, fire-and-forget").
    async fn fire(&self, target: &str, topic: &str, msg: Shareable);

    fn register_handler(&self, topic: &str, handler: Arc<dyn TopicHandler>);
}

enum Mailbox {
    Call { from: String, topic: String, msg: Shareable, reply_to: oneshot::Sender<Shareable> },
    Fire { from: String, topic: String, msg: Shareable },
}

/// Shared directory mapping cell name -> mailbox sender, grounded in
/// `RegistryClient`'s `Arc<RwLock<HashMap<ComponentId, Sender<...>>>>`.
#[derive(Clone, Default)]
pub struct CellBus {
    directory: Arc<RwLock<HashMap<String, mpsc::Sender<Mailbox>>>>,
}

impl CellBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a new named cell on this bus, spawning its
    /// actor loop (grounded in `RegistryClient::spawn_component`'s
    /// thread-per-component pattern, here a `tokio::spawn`ed task).
    pub async fn create_cell(&self, name: &str) -> LocalCell {
        let (tx, rx) = mpsc::channel(256);
        self.directory.write().await.insert(name.to_string(), tx);

        let handlers: Arc<RwLock<HashMap<String, Arc<dyn TopicHandler>>>> = Arc::new(RwLock::new(HashMap::new()));
        let cell = LocalCell { name: name.to_string(), bus: self.clone(), handlers: handlers.clone() };

        tokio::spawn(Self::run_actor_loop(name.to_string(), rx, handlers));
        cell
    }

    async fn run_actor_loop(name: String, mut rx: mpsc::Receiver<Mailbox>, handlers: Arc<RwLock<HashMap<String, Arc<dyn TopicHandler>>>>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Mailbox::Call { from, topic, msg, reply_to } => {
                    let handler = handlers.read().await.get(&topic).cloned();
                    let reply = match handler {
                        Some(h) => h.handle(&from, msg).await,
                        None => {
                            warn!("Cell '{}' has no handler for topic '{}'.", name, topic);
                            Shareable::error_reply(crate::return_code::ReturnCode::ServiceUnavailable)
                        }
                    };
                    let _ = reply_to.send(reply);
                }
                Mailbox::Fire { from, topic, msg } => {
                    let handler = handlers.read().await.get(&topic).cloned();
                    if let Some(h) = handler {
                        h.handle(&from, msg).await;
                    } else {
                        debug!("Cell '{}' dropped a fire-and-forget on unhandled topic '{}'.", name, topic);
                    }
                }
            }
        }
    }

    async fn sender_for(&self, target: &str) -> Option<mpsc::Sender<Mailbox>> {
        self.directory.read().await.get(target).cloned()
    }
}

/// The in-process `Cell` reference implementation bound to one named
/// participant.
#[derive(Clone)]
pub struct LocalCell {
    name: String,
    bus: CellBus,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TopicHandler>>>>,
}

#[async_trait]
impl Cell for LocalCell {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, target: &str, topic: &str, msg: Shareable, timeout: Duration) -> Result<Shareable> {
        let sender = self.bus.sender_for(target).await.ok_or_else(|| Error::Other(format!("unknown target cell '{}'", target)))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Mailbox::Call { from: self.name.clone(), topic: topic.to_string(), msg, reply_to: reply_tx })
            .await
            .map_err(|_| Error::Other(format!("target cell '{}' mailbox closed", target)))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Other(format!("target cell '{}' dropped the reply", target))),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn fire(&self, target: &str, topic: &str, msg: Shareable) {
        if let Some(sender) = self.bus.sender_for(target).await {
            let _ = sender.send(Mailbox::Fire { from: self.name.clone(), topic: topic.to_string(), msg }).await;
        } else {
            debug!("fire: unknown target cell '{}', dropping.", target);
        }
    }

    fn register_handler(&self, topic: &str, handler: Arc<dyn TopicHandler>) {
        let handlers = self.handlers.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            handlers.write().await.insert(topic, handler);
        });
    }
}
