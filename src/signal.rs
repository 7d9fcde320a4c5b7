//! Abort signal tree (spec.md §5, glossary). Triggering a node triggers
//! every descendant atomically; every suspension point polls `triggered()`
//! or awaits `cancelled()`. Built on `tokio::sync::watch`, which the
//! teacher already depends on for its `tokio = { features = ["full"] }`
//! dependency — no new crate needed for what is, at its core, a
//! broadcast-on-write boolean.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    children: Mutex<Vec<Signal>>,
}

/// A cancellation token that forms a parent/child tree. Cloning a `Signal`
/// shares the same node; `child()` creates a new node whose trigger state
/// is independent but which is triggered whenever its parent is.
#[derive(Debug, Clone)]
pub struct Signal(Arc<Inner>);

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Signal(Arc::new(Inner { tx, rx, children: Mutex::new(Vec::new()) }))
    }

    /// Creates a child signal rooted at this one. Triggering `self` also
    /// triggers every child transitively (spec.md: "Triggering a parent
    /// triggers all descendants atomically").
    pub fn child(&self) -> Signal {
        let child = Signal::new();
        self.0.children.lock().expect("signal tree lock poisoned").push(child.clone());
        if self.triggered() {
            child.trigger();
        }
        child
    }

    pub fn triggered(&self) -> bool {
        *self.0.rx.borrow()
    }

    /// Triggers this node and every descendant.
    pub fn trigger(&self) {
        let _ = self.0.tx.send(true);
        let children = self.0.children.lock().expect("signal tree lock poisoned").clone();
        for child in children {
            child.trigger();
        }
    }

    /// Resolves once this signal is triggered — the async counterpart to
    /// polling `triggered()` at a suspension point.
    pub async fn cancelled(&self) {
        let mut rx = self.0.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_cascades_to_children() {
        let root = Signal::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(!child.triggered());
        root.trigger();
        assert!(child.triggered());
        assert!(grandchild.triggered());
    }

    #[test]
    fn child_created_after_trigger_starts_triggered() {
        let root = Signal::new();
        root.trigger();
        let child = root.child();
        assert!(child.triggered());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_trigger() {
        let sig = Signal::new();
        let sig2 = sig.clone();
        let handle = tokio::spawn(async move {
            sig2.cancelled().await;
        });
        sig.trigger();
        handle.await.unwrap();
    }
}
