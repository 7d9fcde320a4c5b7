//! C3 — Resource Manager (per site). Site-local concurrency gatekeeper
//! with two-phase reservation: `check_resources` tentatively reserves and
//! leases a token with a grace period; `allocate_resources` promotes a
//! live token to a committed allocation; `cancel_resources`/
//! `free_resources` release tentative/committed holds respectively.
//!
//! Grounded in the teacher's `resource/resource_store.rs`: a single
//! `Arc<RwLock<StoreInner>>` guarding all mutable state and the rule that
//! "operations never block on I/O under the lock" (spec.md §4.1) — every
//! method below does pure in-memory bookkeeping, including the grace-
//! period sweep, which runs inline on each call rather than via a
//! background task. Reservation tokens are plain `uuid`-generated
//! strings rather than the teacher's `slotmap` keys, since tokens here
//! cross the site boundary as wire values instead of staying in-process.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, warn};
use uuid::Uuid;

use super::request::{Allocation, ResourceRequest, ResourceRequirement};

/// Per-site declared capacity for one resource kind.
#[derive(Debug, Clone)]
pub enum Capacity {
    /// A divisible pool (e.g. cpu core count).
    Count(u64),
    /// An indivisible set of identifiable units (e.g. gpu device ids).
    IdSet(BTreeSet<u64>),
}

#[derive(Debug, Clone)]
enum Hold {
    Count(u64),
    Ids(BTreeSet<u64>),
}

#[derive(Debug)]
struct Tentative {
    holds: HashMap<String, Hold>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct StoreInner {
    capacity: HashMap<String, Capacity>,
    tentative: HashMap<String, Tentative>,
}

/// A site-local resource gatekeeper. Cheap to clone (shares the inner
/// lock), matching the teacher's `ResourceStore` handle pattern.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<RwLock<StoreInner>>,
    grace: Duration,
}

impl ResourceManager {
    /// Default grace period for an unconverted `check_resources`
    /// reservation (DESIGN.md open-question resolution #2).
    pub const DEFAULT_RESERVATION_GRACE: Duration = Duration::from_secs(30);

    pub fn new(capacity: HashMap<String, Capacity>) -> Self {
        Self::with_grace(capacity, Self::DEFAULT_RESERVATION_GRACE)
    }

    pub fn with_grace(capacity: HashMap<String, Capacity>, grace: Duration) -> Self {
        ResourceManager { inner: Arc::new(RwLock::new(StoreInner { capacity, tentative: HashMap::new() })), grace }
    }

    /// Drops every tentative reservation whose grace period has elapsed,
    /// returning its holds to the free pool. Called inline at the top of
    /// every public method — pure in-memory work, no I/O.
    fn expire_stale(guard: &mut StoreInner) {
        let now = Instant::now();
        let expired: Vec<String> = guard.tentative.iter().filter(|(_, t)| t.expires_at <= now).map(|(tok, _)| tok.clone()).collect();
        for token in expired {
            if let Some(t) = guard.tentative.remove(&token) {
                warn!("Reservation token {} expired after its grace period; releasing.", token);
                Self::release_holds(&mut guard.capacity, &t.holds);
            }
        }
    }

    fn release_holds(capacity: &mut HashMap<String, Capacity>, holds: &HashMap<String, Hold>) {
        for (kind, hold) in holds {
            match (capacity.get_mut(kind), hold) {
                (Some(Capacity::Count(total)), Hold::Count(n)) => *total += n,
                (Some(Capacity::IdSet(set)), Hold::Ids(ids)) => {
                    set.extend(ids.iter().copied());
                }
                _ => {}
            }
        }
    }

    /// Evaluates whether `req` could be satisfied now; if so, tentatively
    /// reserves it and returns a token. Not idempotent: every successful
    /// call consumes capacity until cancelled, allocated, or expired
    /// (spec.md §4.1).
    pub fn check_resources(&self, req: &ResourceRequest) -> (bool, Option<String>) {
        let mut guard = self.inner.write().expect("resource manager lock poisoned");
        Self::expire_stale(&mut guard);

        let mut holds = HashMap::new();
        for (kind, requirement) in req {
            let ResourceRequirement::Count(n) = *requirement;
            match guard.capacity.get(kind) {
                Some(Capacity::Count(available)) if *available >= n => {
                    holds.insert(kind.clone(), Hold::Count(n));
                }
                Some(Capacity::IdSet(available)) if available.len() as u64 >= n => {
                    let chosen: BTreeSet<u64> = available.iter().take(n as usize).copied().collect();
                    holds.insert(kind.clone(), Hold::Ids(chosen));
                }
                _ => {
                    debug!("Resource kind '{}' unavailable in the requested quantity.", kind);
                    return (false, None);
                }
            }
        }

        for (kind, hold) in &holds {
            match (guard.capacity.get_mut(kind), hold) {
                (Some(Capacity::Count(total)), Hold::Count(n)) => *total -= n,
                (Some(Capacity::IdSet(set)), Hold::Ids(ids)) => {
                    for id in ids {
                        set.remove(id);
                    }
                }
                _ => unreachable!("capacity kind checked above"),
            }
        }

        let token = Uuid::new_v4().to_string();
        guard.tentative.insert(token.clone(), Tentative { holds, expires_at: Instant::now() + self.grace });
        (true, Some(token))
    }

    /// Releases a tentative reservation. Unknown tokens are logged and
    /// produce no state change (spec.md §4.1).
    pub fn cancel_resources(&self, token: &str) {
        let mut guard = self.inner.write().expect("resource manager lock poisoned");
        Self::expire_stale(&mut guard);
        match guard.tentative.remove(token) {
            Some(t) => Self::release_holds(&mut guard.capacity, &t.holds),
            None => warn!("cancel_resources: unknown token '{}'.", token),
        }
    }

    /// Promotes a tentative reservation to a committed allocation. Fails
    /// if the token is unknown or expired.
    pub fn allocate_resources(&self, token: &str) -> Option<Allocation> {
        let mut guard = self.inner.write().expect("resource manager lock poisoned");
        Self::expire_stale(&mut guard);
        let tentative = match guard.tentative.remove(token) {
            Some(t) => t,
            None => {
                warn!("allocate_resources: unknown or expired token '{}'.", token);
                return None;
            }
        };

        let mut allocation = Allocation::default();
        for (kind, hold) in tentative.holds {
            match hold {
                Hold::Count(n) => {
                    allocation.counts.insert(kind, n);
                }
                Hold::Ids(ids) => {
                    allocation.ids.insert(kind, ids);
                }
            }
        }
        Some(allocation)
    }

    /// Releases a committed allocation, returning its ids/counts to the
    /// free pool.
    pub fn free_resources(&self, allocation: &Allocation) {
        let mut guard = self.inner.write().expect("resource manager lock poisoned");
        for (kind, n) in &allocation.counts {
            if let Some(Capacity::Count(total)) = guard.capacity.get_mut(kind) {
                *total += n;
            }
        }
        for (kind, ids) in &allocation.ids {
            if let Some(Capacity::IdSet(set)) = guard.capacity.get_mut(kind) {
                set.extend(ids.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ResourceManager {
        let mut cap = HashMap::new();
        cap.insert("cpu".to_string(), Capacity::Count(2));
        cap.insert("gpu".to_string(), Capacity::IdSet([0, 1].into_iter().collect()));
        ResourceManager::new(cap)
    }

    fn req(cpu: u64, gpu: u64) -> ResourceRequest {
        let mut r = HashMap::new();
        r.insert("cpu".to_string(), ResourceRequirement::Count(cpu));
        r.insert("gpu".to_string(), ResourceRequirement::Count(gpu));
        r
    }

    #[test]
    fn reserve_allocate_free_round_trip_restores_capacity() {
        let mgr = manager();
        let (ok, token) = mgr.check_resources(&req(1, 1));
        assert!(ok);
        let token = token.unwrap();
        let alloc = mgr.allocate_resources(&token).expect("allocation succeeds");
        mgr.free_resources(&alloc);

        let (ok2, token2) = mgr.check_resources(&req(2, 2));
        assert!(ok2);
        mgr.cancel_resources(&token2.unwrap());
    }

    #[test]
    fn check_resources_is_not_idempotent() {
        let mgr = manager();
        let (ok1, _) = mgr.check_resources(&req(2, 0));
        assert!(ok1);
        let (ok2, token2) = mgr.check_resources(&req(1, 0));
        assert!(!ok2);
        assert!(token2.is_none());
    }

    #[test]
    fn insufficient_resources_rejected_without_partial_hold() {
        let mgr = manager();
        let (ok, token) = mgr.check_resources(&req(10, 0));
        assert!(!ok);
        assert!(token.is_none());
        // cpu capacity untouched: a follow-up request for all of it succeeds.
        let (ok2, _) = mgr.check_resources(&req(2, 0));
        assert!(ok2);
    }

    #[test]
    fn unknown_token_operations_are_noops() {
        let mgr = manager();
        mgr.cancel_resources("does-not-exist");
        assert!(mgr.allocate_resources("does-not-exist").is_none());
    }

    #[test]
    fn expired_tentative_reservation_releases_capacity() {
        let mut cap = HashMap::new();
        cap.insert("cpu".to_string(), Capacity::Count(1));
        let mgr = ResourceManager::with_grace(cap, Duration::from_millis(10));
        let (ok, _) = mgr.check_resources(&req(1, 0));
        assert!(ok);
        std::thread::sleep(Duration::from_millis(30));
        let (ok2, _) = mgr.check_resources(&req(1, 0));
        assert!(ok2, "expired reservation should have freed its hold");
    }

    #[test]
    fn free_resources_returns_same_gpu_ids() {
        let mgr = manager();
        let (_, token) = mgr.check_resources(&req(0, 2));
        let alloc = mgr.allocate_resources(&token.unwrap()).unwrap();
        assert_eq!(alloc.ids.get("gpu").unwrap(), &[0u64, 1u64].into_iter().collect());
        mgr.free_resources(&alloc);
        let (ok, _) = mgr.check_resources(&req(0, 2));
        assert!(ok);
    }
}
