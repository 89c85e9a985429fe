//! Pluggable load-balancing policies.
//!
//! Four interchangeable implementations behind one [`Balancer`] trait,
//! selected at construction time by [`BalancerFactory`] — no runtime
//! switching, mirroring the original Go `Balancer` interface and its four
//! constructors (`NewRandom`, `NewLeastConnections`,
//! `NewConsistentHashingBounded`, `NewPullBased`).

mod consistent_hash;
mod least_connections;
mod pull_based;
mod random;

pub use consistent_hash::ConsistentHashingBoundedBalancer;
pub use least_connections::LeastConnectionsBalancer;
pub use pull_based::PullBasedBalancer;
pub use random::RandomBalancer;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PolicyKind;
use crate::error::SchedulerError;
use crate::worker::{Lambda, WorkerUrl};

/// Request-derived context a policy may use to make a routing decision.
///
/// Only `ConsistentHashingBoundedBalancer` currently reads this (the hash
/// key is the request's path + query string, per spec); the other policies
/// ignore it entirely.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub path_and_query: String,
}

/// Core trait every load-balancing policy implements.
///
/// Contracts (spec §4.1) are policy-independent unless noted on the
/// individual method or implementation:
///
/// - `select_worker` returns exactly one worker from the current pool and
///   atomically accounts for the selection; it fails only when the pool is
///   empty.
/// - `release_worker` is not required to be idempotent — callers pair each
///   successful `select_worker` with exactly one `release_worker` — but a
///   release for a worker no longer in the pool must be a harmless no-op.
/// - `add_worker`/`remove_worker` on an already-present/absent URL are
///   treated as idempotent no-ops rather than panics.
/// - `get_all_workers` returns a defensive copy.
#[async_trait]
pub trait Balancer: Send + Sync + Debug {
    async fn select_worker(
        &self,
        ctx: &SelectionContext,
        lambda: &Lambda,
    ) -> Result<WorkerUrl, SchedulerError>;

    fn release_worker(&self, worker: &WorkerUrl, lambda: &Lambda);

    fn add_worker(&self, worker: WorkerUrl);

    fn remove_worker(&self, worker: &WorkerUrl);

    fn get_all_workers(&self) -> Vec<WorkerUrl>;

    /// Signals that a worker-side cache entry for `lambda` is gone.
    /// Only `PullBasedBalancer` does anything with this; the rest no-op.
    fn destroy_sandbox(&self, worker: &WorkerUrl, lambda: &Lambda);

    /// Policy name, for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// Builds a [`Balancer`] trait object from configuration.
pub struct BalancerFactory;

impl BalancerFactory {
    pub fn create(policy: PolicyKind, workers: Vec<WorkerUrl>) -> Arc<dyn Balancer> {
        match policy {
            PolicyKind::Random => Arc::new(RandomBalancer::new(workers)),
            PolicyKind::LeastConnections => Arc::new(LeastConnectionsBalancer::new(workers)),
            PolicyKind::ConsistentHashingBounded => {
                Arc::new(ConsistentHashingBoundedBalancer::new(workers))
            }
            PolicyKind::PullBased => Arc::new(PullBasedBalancer::new(workers)),
        }
    }
}

/// Scans `workers` for the minimum value under `load_of`, collecting every
/// worker tied at that minimum, then breaks ties uniformly at random.
///
/// Shared by `LeastConnectionsBalancer` and `PullBasedBalancer`'s
/// empty-queue fallback — both implement the same "least loaded, random
/// tie-break" scan as the original `selectLeastLoadedWorker`.
pub(crate) fn pick_least_loaded<'a>(
    workers: &'a [WorkerUrl],
    load_of: impl Fn(&WorkerUrl) -> u32,
) -> Option<&'a WorkerUrl> {
    use rand::Rng;

    if workers.is_empty() {
        return None;
    }

    let mut least = load_of(&workers[0]);
    let mut tied: Vec<&WorkerUrl> = vec![&workers[0]];

    for worker in &workers[1..] {
        let load = load_of(worker);
        if load < least {
            least = load;
            tied.clear();
            tied.push(worker);
        } else if load == least {
            tied.push(worker);
        }
    }

    if tied.len() == 1 {
        Some(tied[0])
    } else {
        let idx = rand::rng().random_range(0..tied.len());
        Some(tied[idx])
    }
}
