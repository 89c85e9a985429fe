//! Least-connections policy: always route to the worker with the fewest
//! in-flight requests, breaking ties uniformly at random.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{pick_least_loaded, Balancer, SelectionContext};
use crate::error::SchedulerError;
use crate::worker::{Lambda, WorkerUrl};

struct State {
    workers: Vec<WorkerUrl>,
    load: HashMap<WorkerUrl, u32>,
}

/// Single mutex guarding `workers` and the load map together, so the scan
/// in `select_worker` always sees a consistent pair. Critical sections are
/// O(|pool|), matching spec §5.
#[derive(Debug)]
pub struct LeastConnectionsBalancer {
    state: Mutex<State>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("workers", &self.workers).finish()
    }
}

impl LeastConnectionsBalancer {
    pub fn new(workers: Vec<WorkerUrl>) -> Self {
        let load = workers.iter().cloned().map(|w| (w, 0)).collect();
        Self {
            state: Mutex::new(State { workers, load }),
        }
    }
}

#[async_trait]
impl Balancer for LeastConnectionsBalancer {
    async fn select_worker(
        &self,
        _ctx: &SelectionContext,
        _lambda: &Lambda,
    ) -> Result<WorkerUrl, SchedulerError> {
        let mut state = self.state.lock();
        if state.workers.is_empty() {
            return Err(SchedulerError::PoolEmpty);
        }

        let chosen = pick_least_loaded(&state.workers, |w| {
            *state.load.get(w).unwrap_or(&0)
        })
        .cloned()
        .expect("non-empty pool checked above");

        *state.load.entry(chosen.clone()).or_insert(0) += 1;
        Ok(chosen)
    }

    fn release_worker(&self, worker: &WorkerUrl, _lambda: &Lambda) {
        let mut state = self.state.lock();
        // A release for a worker removed from the pool touches a map key
        // that no longer exists; guard against unsigned underflow with a
        // saturating decrement rather than crash or go negative.
        if let Some(load) = state.load.get_mut(worker) {
            *load = load.saturating_sub(1);
        }
    }

    fn add_worker(&self, worker: WorkerUrl) {
        let mut state = self.state.lock();
        if !state.workers.contains(&worker) {
            state.workers.push(worker.clone());
        }
        state.load.entry(worker).or_insert(0);
    }

    fn remove_worker(&self, worker: &WorkerUrl) {
        let mut state = self.state.lock();
        state.workers.retain(|w| w != worker);
        state.load.remove(worker);
    }

    fn get_all_workers(&self) -> Vec<WorkerUrl> {
        self.state.lock().workers.clone()
    }

    fn destroy_sandbox(&self, _worker: &WorkerUrl, _lambda: &Lambda) {}

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SelectionContext {
        SelectionContext {
            path_and_query: "/run/test".to_string(),
        }
    }

    #[tokio::test]
    async fn distributes_across_two_workers() {
        let b = LeastConnectionsBalancer::new(vec![
            WorkerUrl::parse("http://w1:8000").unwrap(),
            WorkerUrl::parse("http://w2:8000").unwrap(),
        ]);
        let lambda = Lambda::new("f");

        let first = b.select_worker(&ctx(), &lambda).await.unwrap();
        let second = b.select_worker(&ctx(), &lambda).await.unwrap();
        assert_ne!(first, second);

        b.release_worker(&first, &lambda);
        let third = b.select_worker(&ctx(), &lambda).await.unwrap();
        assert_eq!(third, first);
    }

    #[tokio::test]
    async fn load_returns_to_zero_after_matched_release() {
        let workers = vec![
            WorkerUrl::parse("http://w1:8000").unwrap(),
            WorkerUrl::parse("http://w2:8000").unwrap(),
        ];
        let b = LeastConnectionsBalancer::new(workers.clone());
        let lambda = Lambda::new("f");

        let mut selected = Vec::new();
        for _ in 0..20 {
            selected.push(b.select_worker(&ctx(), &lambda).await.unwrap());
        }
        for w in &selected {
            b.release_worker(w, &lambda);
        }

        let state = b.state.lock();
        for w in &workers {
            assert_eq!(state.load[w], 0);
        }
    }

    #[tokio::test]
    async fn release_after_remove_does_not_panic_or_underflow() {
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        let b = LeastConnectionsBalancer::new(vec![w1.clone()]);
        let lambda = Lambda::new("f");

        let _ = b.select_worker(&ctx(), &lambda).await.unwrap();
        b.remove_worker(&w1);
        // Late release on an unknown key must be a harmless no-op.
        b.release_worker(&w1, &lambda);
        assert!(b.get_all_workers().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_errors_without_mutating_state() {
        let b = LeastConnectionsBalancer::new(vec![]);
        let lambda = Lambda::new("f");
        assert!(matches!(
            b.select_worker(&ctx(), &lambda).await,
            Err(SchedulerError::PoolEmpty)
        ));
    }

    #[test]
    fn add_remove_round_trip() {
        let b = LeastConnectionsBalancer::new(vec![]);
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        let w2 = WorkerUrl::parse("http://w2:8000").unwrap();
        b.add_worker(w1.clone());
        b.add_worker(w2.clone());
        b.remove_worker(&w1);
        assert_eq!(b.get_all_workers(), vec![w2]);
    }
}
