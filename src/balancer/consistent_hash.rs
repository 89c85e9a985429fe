//! Consistent hashing with bounded loads.
//!
//! Grounded on the original Go balancer, which delegates to
//! `github.com/lafikl/consistent` (`GetLeast`/`Inc`/`Done`/`Add`/`Remove`):
//! a hash ring over worker hosts, where the natural ring position for a key
//! is skipped in favor of the next ring position whenever the natural
//! target's load exceeds a bound derived from the average load across the
//! pool. There is no equivalent crate in this dependency set, so the ring
//! is hand-rolled here the same way `ConsistentHashPolicy` hand-rolls its
//! ring with a `BTreeMap<u64, String>`, just with bounded-load probing
//! added on top of plain nearest-successor lookup.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Balancer, SelectionContext};
use crate::error::SchedulerError;
use crate::worker::{Lambda, WorkerUrl};

const VIRTUAL_NODES_PER_WORKER: u32 = 160;
/// A host accepts a key only while its load stays under
/// `ceil(average_load) * LOAD_FACTOR`, per "consistent hashing with
/// bounded loads" (Mirrokni et al.).
const LOAD_FACTOR: f64 = 1.25;

struct RingState {
    /// Virtual-node hash -> host string (`host:port`).
    ring: BTreeMap<u64, String>,
    /// Host string -> the worker it represents.
    hosts: HashMap<String, WorkerUrl>,
    /// Per-host in-flight request count.
    load: HashMap<String, u32>,
    total_load: u32,
}

impl RingState {
    fn new() -> Self {
        Self {
            ring: BTreeMap::new(),
            hosts: HashMap::new(),
            load: HashMap::new(),
            total_load: 0,
        }
    }

    fn insert_host(&mut self, worker: WorkerUrl) {
        let host = worker.host();
        if self.hosts.contains_key(&host) {
            return;
        }
        for i in 0..VIRTUAL_NODES_PER_WORKER {
            let key = format!("{host}#{i}");
            self.ring.insert(fnv1a(key.as_bytes()), host.clone());
        }
        self.load.insert(host.clone(), 0);
        self.hosts.insert(host, worker);
    }

    fn remove_host(&mut self, worker: &WorkerUrl) {
        let host = worker.host();
        if self.hosts.remove(&host).is_none() {
            return;
        }
        for i in 0..VIRTUAL_NODES_PER_WORKER {
            let key = format!("{host}#{i}");
            self.ring.remove(&fnv1a(key.as_bytes()));
        }
        if let Some(load) = self.load.remove(&host) {
            self.total_load = self.total_load.saturating_sub(load);
        }
    }

    fn threshold(&self) -> u32 {
        if self.hosts.is_empty() {
            return 0;
        }
        let average = self.total_load as f64 / self.hosts.len() as f64;
        ((average * LOAD_FACTOR).ceil() as u32).max(1)
    }

    /// Walks the ring clockwise from `key_hash`, returning the first host
    /// whose load is under the bounded-load threshold. Falls back to the
    /// least-loaded host if every host is at or over the threshold (this
    /// can only happen transiently, since the threshold always admits at
    /// least one request per host).
    fn pick_host(&self, key_hash: u64) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let threshold = self.threshold();

        let ordered = self
            .ring
            .range(key_hash..)
            .chain(self.ring.iter())
            .map(|(_, host)| host.as_str());

        let mut seen = std::collections::HashSet::new();
        for host in ordered {
            if !seen.insert(host) {
                continue;
            }
            if *self.load.get(host).unwrap_or(&0) < threshold {
                return Some(host);
            }
            if seen.len() == self.hosts.len() {
                break;
            }
        }

        self.load
            .iter()
            .min_by_key(|(_, load)| **load)
            .map(|(host, _)| host.as_str())
    }
}

/// FNV-1a, used only to place ring points deterministically — no
/// cross-process stability is required, just determinism within one
/// running router so repeated lookups of the same key agree.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hash-ring-backed policy keyed on the request's path and query string.
/// No explicit balancer-level mutex: serialization is delegated to the
/// ring structure's own lock, matching spec §4.1.c.
#[derive(Debug)]
pub struct ConsistentHashingBoundedBalancer {
    state: Mutex<RingState>,
}

impl std::fmt::Debug for RingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingState")
            .field("hosts", &self.hosts.len())
            .field("total_load", &self.total_load)
            .finish()
    }
}

impl ConsistentHashingBoundedBalancer {
    pub fn new(workers: Vec<WorkerUrl>) -> Self {
        let mut state = RingState::new();
        for worker in workers {
            state.insert_host(worker);
        }
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl Balancer for ConsistentHashingBoundedBalancer {
    async fn select_worker(
        &self,
        ctx: &SelectionContext,
        _lambda: &Lambda,
    ) -> Result<WorkerUrl, SchedulerError> {
        let mut state = self.state.lock();
        if state.hosts.is_empty() {
            return Err(SchedulerError::PoolEmpty);
        }

        let key_hash = fnv1a(ctx.path_and_query.as_bytes());
        let host = state
            .pick_host(key_hash)
            .expect("non-empty ring checked above")
            .to_string();

        *state.load.get_mut(&host).expect("host present in load map") += 1;
        state.total_load += 1;

        Ok(state.hosts[&host].clone())
    }

    fn release_worker(&self, worker: &WorkerUrl, _lambda: &Lambda) {
        let mut state = self.state.lock();
        let host = worker.host();
        if let Some(load) = state.load.get_mut(&host) {
            *load = load.saturating_sub(1);
            state.total_load = state.total_load.saturating_sub(1);
        }
    }

    fn add_worker(&self, worker: WorkerUrl) {
        self.state.lock().insert_host(worker);
    }

    fn remove_worker(&self, worker: &WorkerUrl) {
        self.state.lock().remove_host(worker);
    }

    fn get_all_workers(&self) -> Vec<WorkerUrl> {
        self.state.lock().hosts.values().cloned().collect()
    }

    fn destroy_sandbox(&self, _worker: &WorkerUrl, _lambda: &Lambda) {}

    fn name(&self) -> &'static str {
        "hashing_bounded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(path: &str) -> SelectionContext {
        SelectionContext {
            path_and_query: path.to_string(),
        }
    }

    #[tokio::test]
    async fn identical_keys_route_to_the_same_worker() {
        let b = ConsistentHashingBoundedBalancer::new(vec![
            WorkerUrl::parse("http://w1:8000").unwrap(),
            WorkerUrl::parse("http://w2:8000").unwrap(),
        ]);
        let lambda = Lambda::new("test");

        let first = b.select_worker(&ctx("/run/test"), &lambda).await.unwrap();
        b.release_worker(&first, &lambda);
        let second = b.select_worker(&ctx("/run/test"), &lambda).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_pool_is_server_error() {
        let b = ConsistentHashingBoundedBalancer::new(vec![]);
        let lambda = Lambda::new("test");
        assert!(matches!(
            b.select_worker(&ctx("/run/test"), &lambda).await,
            Err(SchedulerError::PoolEmpty)
        ));
    }

    #[tokio::test]
    async fn load_returns_to_zero_after_release() {
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        let b = ConsistentHashingBoundedBalancer::new(vec![w1.clone()]);
        let lambda = Lambda::new("test");

        let picked = b.select_worker(&ctx("/run/test"), &lambda).await.unwrap();
        assert_eq!(picked, w1);
        b.release_worker(&picked, &lambda);

        let state = b.state.lock();
        assert_eq!(state.total_load, 0);
    }

    #[test]
    fn add_remove_round_trip() {
        let b = ConsistentHashingBoundedBalancer::new(vec![]);
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        b.add_worker(w1.clone());
        assert_eq!(b.get_all_workers(), vec![w1.clone()]);
        b.remove_worker(&w1);
        assert!(b.get_all_workers().is_empty());
    }

    #[tokio::test]
    async fn bounded_load_spreads_across_workers_under_pressure() {
        let b = ConsistentHashingBoundedBalancer::new(vec![
            WorkerUrl::parse("http://w1:8000").unwrap(),
            WorkerUrl::parse("http://w2:8000").unwrap(),
        ]);
        let lambda = Lambda::new("test");

        // Many distinct keys with no releases should not all pile onto a
        // single host once the bounded-load threshold kicks in.
        let mut used = std::collections::HashSet::new();
        for i in 0..50 {
            let picked = b
                .select_worker(&ctx(&format!("/run/test?k={i}")), &lambda)
                .await
                .unwrap();
            used.insert(picked);
        }
        assert_eq!(used.len(), 2);
    }
}
