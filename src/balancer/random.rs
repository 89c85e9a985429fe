//! Uniform random selection, no load accounting.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use super::{Balancer, SelectionContext};
use crate::error::SchedulerError;
use crate::worker::{Lambda, WorkerUrl};

/// Picks a uniformly random worker on every selection; `release_worker` is
/// a no-op since no load is tracked.
///
/// The original Go source left `AddWorker`/`RemoveWorker`/`SelectWorker`
/// unsynchronized against each other — spec §9 flags this as a bug to fix
/// rather than preserve, so the pool here is guarded by a mutex like every
/// other policy.
#[derive(Debug)]
pub struct RandomBalancer {
    workers: Mutex<Vec<WorkerUrl>>,
}

impl RandomBalancer {
    pub fn new(workers: Vec<WorkerUrl>) -> Self {
        Self {
            workers: Mutex::new(workers),
        }
    }
}

#[async_trait]
impl Balancer for RandomBalancer {
    async fn select_worker(
        &self,
        _ctx: &SelectionContext,
        _lambda: &Lambda,
    ) -> Result<WorkerUrl, SchedulerError> {
        let workers = self.workers.lock();
        if workers.is_empty() {
            return Err(SchedulerError::PoolEmpty);
        }
        let idx = rand::rng().random_range(0..workers.len());
        Ok(workers[idx].clone())
    }

    fn release_worker(&self, _worker: &WorkerUrl, _lambda: &Lambda) {}

    fn add_worker(&self, worker: WorkerUrl) {
        let mut workers = self.workers.lock();
        if !workers.contains(&worker) {
            workers.push(worker);
        }
    }

    fn remove_worker(&self, worker: &WorkerUrl) {
        self.workers.lock().retain(|w| w != worker);
    }

    fn get_all_workers(&self) -> Vec<WorkerUrl> {
        self.workers.lock().clone()
    }

    fn destroy_sandbox(&self, _worker: &WorkerUrl, _lambda: &Lambda) {}

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn urls(n: usize) -> Vec<WorkerUrl> {
        (0..n)
            .map(|i| WorkerUrl::parse(&format!("http://w{i}:8000")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn selects_from_pool() {
        let b = RandomBalancer::new(urls(2));
        let ctx = SelectionContext {
            path_and_query: "/run/test".to_string(),
        };
        let lambda = Lambda::new("test");
        let picked = b.select_worker(&ctx, &lambda).await.unwrap();
        assert!(b.get_all_workers().contains(&picked));
    }

    #[tokio::test]
    async fn empty_pool_is_server_error() {
        let b = RandomBalancer::new(vec![]);
        let ctx = SelectionContext {
            path_and_query: "/run/test".to_string(),
        };
        let lambda = Lambda::new("test");
        assert!(matches!(
            b.select_worker(&ctx, &lambda).await,
            Err(SchedulerError::PoolEmpty)
        ));
    }

    #[tokio::test]
    async fn thousand_selections_cover_every_worker() {
        let pool = urls(3);
        let b = RandomBalancer::new(pool.clone());
        let ctx = SelectionContext {
            path_and_query: "/run/test".to_string(),
        };
        let lambda = Lambda::new("test");

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let picked = b.select_worker(&ctx, &lambda).await.unwrap();
            seen.insert(picked);
        }
        assert_eq!(seen.len(), pool.len());
    }

    #[test]
    fn add_then_remove_round_trips() {
        let b = RandomBalancer::new(urls(0));
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        b.add_worker(w1.clone());
        assert_eq!(b.get_all_workers(), vec![w1.clone()]);
        b.remove_worker(&w1);
        assert!(b.get_all_workers().is_empty());
    }

    #[test]
    fn add_existing_worker_is_idempotent() {
        let w1 = WorkerUrl::parse("http://w1:8000").unwrap();
        let b = RandomBalancer::new(vec![w1.clone()]);
        b.add_worker(w1.clone());
        assert_eq!(b.get_all_workers(), vec![w1]);
    }

    #[test]
    fn remove_unknown_worker_is_a_no_op() {
        let b = RandomBalancer::new(urls(1));
        let unknown = WorkerUrl::parse("http://ghost:8000").unwrap();
        b.remove_worker(&unknown);
        assert_eq!(b.get_all_workers().len(), 1);
    }
}
