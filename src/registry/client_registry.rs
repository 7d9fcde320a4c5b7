//! C2 — Client Registry. Grounded on the teacher's `domain/client.rs`
//! (`ClientRegistry` wrapping a `HashMap<String, Client>`, driven through
//! the `Entry` API, with `log::{info, warn}!` at every state change).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

/// A connected participant (spec.md §3 "Participant").
#[derive(Debug, Clone)]
pub struct Client {
    pub name: String,
    pub token: String,
    pub organization: Option<String>,
    pub listening_endpoint: Option<String>,
    last_heartbeat: DateTime<Utc>,
    disconnect_time: Option<DateTime<Utc>>,
}

impl Client {
    pub fn is_dead(&self) -> bool {
        self.disconnect_time.is_some()
    }
}

/// Tracks connected clients, their tokens, and liveness. A client whose
/// last heartbeat exceeds `heartbeat_timeout` is marked DEAD and its
/// `disconnect_time` is fixed; a DEAD client does not participate in
/// scheduling (spec.md §4.2).
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
    heartbeat_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        ClientRegistry { clients: HashMap::new(), heartbeat_timeout }
    }

    /// Registers a client under `name` with a fresh `token`. A reconnect
    /// under the same name with a different token is treated as a *new*
    /// client (DESIGN.md open-question resolution #1): the old entry is
    /// dropped, not rebound, so any job that was tracking the old token
    /// will observe it via `get_client_disconnect_time` on its next touch.
    pub fn register(&mut self, name: &str, token: &str, organization: Option<String>, listening_endpoint: Option<String>) {
        match self.clients.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.token != token {
                    info!("Client '{}' reconnected with a new token; treating as a new client.", name);
                }
                existing.token = token.to_string();
                existing.organization = organization;
                existing.listening_endpoint = listening_endpoint;
                existing.last_heartbeat = Utc::now();
                existing.disconnect_time = None;
            }
            Entry::Vacant(entry) => {
                info!("Registering new client '{}'.", name);
                entry.insert(Client {
                    name: name.to_string(),
                    token: token.to_string(),
                    organization,
                    listening_endpoint,
                    last_heartbeat: Utc::now(),
                    disconnect_time: None,
                });
            }
        }
    }

    /// Records a heartbeat from `name`, reviving it if it had been marked
    /// DEAD under a stale reading.
    pub fn heartbeat(&mut self, name: &str) {
        if let Some(client) = self.clients.get_mut(name) {
            client.last_heartbeat = Utc::now();
            client.disconnect_time = None;
        } else {
            warn!("Heartbeat received from unregistered client '{}'.", name);
        }
    }

    /// Sweeps every client, marking any whose last heartbeat is older than
    /// `heartbeat_timeout` as DEAD. Idempotent: a client already marked
    /// DEAD keeps its original `disconnect_time`.
    pub fn sweep_dead_clients(&mut self) {
        let now = Utc::now();
        for client in self.clients.values_mut() {
            if client.disconnect_time.is_some() {
                continue;
            }
            let elapsed = now.signed_duration_since(client.last_heartbeat);
            if elapsed.to_std().unwrap_or(Duration::ZERO) > self.heartbeat_timeout {
                warn!("Client '{}' missed its heartbeat; marking DEAD.", client.name);
                client.disconnect_time = Some(now);
            }
        }
    }

    pub fn get_client_disconnect_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.clients.get(name).and_then(|c| c.disconnect_time)
    }

    pub fn get(&self, name: &str) -> Option<&Client> {
        self.clients.get(name)
    }

    /// Names of every client that is currently live (not DEAD).
    pub fn live_client_names(&self) -> Vec<String> {
        self.clients.values().filter(|c| !c.is_dead()).map(|c| c.name.clone()).collect()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.clients.get(name).map(|c| !c.is_dead()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Duration::from_millis(50))
    }

    #[test]
    fn fresh_client_is_live() {
        let mut r = registry();
        r.register("A", "tok-1", None, None);
        assert!(r.is_live("A"));
        assert_eq!(r.get_client_disconnect_time("A"), None);
    }

    #[test]
    fn reconnect_with_new_token_revives_and_replaces_token() {
        let mut r = registry();
        r.register("A", "tok-1", None, None);
        r.register("A", "tok-2", None, None);
        assert_eq!(r.get("A").unwrap().token, "tok-2");
        assert!(r.is_live("A"));
    }

    #[test]
    fn sweep_marks_stale_clients_dead() {
        let mut r = registry();
        r.register("A", "tok-1", None, None);
        std::thread::sleep(Duration::from_millis(80));
        r.sweep_dead_clients();
        assert!(!r.is_live("A"));
        assert!(r.get_client_disconnect_time("A").is_some());
    }

    #[test]
    fn heartbeat_revives_dead_client() {
        let mut r = registry();
        r.register("A", "tok-1", None, None);
        std::thread::sleep(Duration::from_millis(80));
        r.sweep_dead_clients();
        assert!(!r.is_live("A"));
        r.heartbeat("A");
        assert!(r.is_live("A"));
    }

    #[test]
    fn dead_clients_excluded_from_live_list() {
        let mut r = registry();
        r.register("A", "tok-1", None, None);
        r.register("B", "tok-2", None, None);
        std::thread::sleep(Duration::from_millis(80));
        r.sweep_dead_clients();
        r.heartbeat("B");
        assert_eq!(r.live_client_names(), vec!["B".to_string()]);
    }
}
