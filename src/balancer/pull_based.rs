//! Pull-based policy: prefer workers that recently served the same
//! function (warm caches), falling back to a least-loaded scan.
//!
//! This is the hard core flagged by the spec: three coupled structures —
//! the worker pool, a global load map, and one idle-worker priority queue
//! per function — must stay mutually consistent under concurrent dispatch,
//! and a load change for any worker must propagate into every per-function
//! heap that currently indexes that worker's host.
//!
//! `std::collections::BinaryHeap` cannot express the required
//! `heap_index`-on-entry / in-place `fix`/`remove-by-index` operations (it
//! only exposes push/pop), so this hand-rolls the same intrusive
//! binary heap `container/heap` gives the original Go implementation for
//! free: a `Vec<IdleEntry>` plus sift-up/sift-down, each entry carrying its
//! own live index into that vector.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{pick_least_loaded, Balancer, SelectionContext};
use crate::error::SchedulerError;
use crate::worker::{Lambda, WorkerUrl};

/// One idle worker waiting to be reused for a particular function.
///
/// `seq` breaks ties between entries with equal `load` by insertion order
/// (oldest first), since the Go `container/heap` comparator only orders by
/// load and leaves same-load ties to whatever the heap's internal swaps
/// happen to produce — spec invariant (i) pins that down to FIFO among
/// ties, which `seq` gives us deterministically.
#[derive(Debug, Clone)]
struct IdleEntry {
    worker: WorkerUrl,
    load: u32,
    seq: u64,
    heap_index: usize,
}

fn less(a: &IdleEntry, b: &IdleEntry) -> bool {
    (a.load, a.seq) < (b.load, b.seq)
}

/// A function's idle-worker min-heap, ordered by `(load, seq)` ascending.
#[derive(Debug, Default)]
struct IdleQueue {
    heap: Vec<IdleEntry>,
}

impl IdleQueue {
    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.heap[i].heap_index = i;
        self.heap[j].heap_index = j;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if less(&self.heap[i], &self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < n && less(&self.heap[left], &self.heap[smallest]) {
                smallest = left;
            }
            if right < n && less(&self.heap[right], &self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn push(&mut self, mut entry: IdleEntry) {
        entry.heap_index = self.heap.len();
        self.heap.push(entry);
        let last = self.heap.len() - 1;
        self.sift_up(last);
    }

    /// Pops the minimum entry, matching Go's `heap.Pop`: swap root with the
    /// last element, truncate, then sift the new root down.
    fn pop(&mut self) -> Option<IdleEntry> {
        let n = self.heap.len();
        if n == 0 {
            return None;
        }
        self.swap(0, n - 1);
        let popped = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        popped
    }

    /// Removes the entry currently at `index`, matching `heap.Remove`.
    fn remove_at(&mut self, index: usize) -> Option<IdleEntry> {
        let n = self.heap.len();
        if index >= n {
            return None;
        }
        let last = n - 1;
        if index != last {
            self.swap(index, last);
        }
        let removed = self.heap.pop();
        if index < self.heap.len() {
            self.sift_down(index);
            self.sift_up(index);
        }
        removed
    }

    /// Updates the load of the entry at `index` and restores the heap
    /// property around it, matching Go's `Update` (`item.load = x;
    /// heap.Fix(pq, item.index)`).
    fn fix_load_at(&mut self, index: usize, new_load: u32) {
        if index >= self.heap.len() {
            return;
        }
        self.heap[index].load = new_load;
        self.sift_down(index);
        self.sift_up(index);
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        self.heap.iter().enumerate().all(|(i, e)| e.heap_index == i)
            && (0..self.heap.len()).all(|i| {
                let left = 2 * i + 1;
                let right = 2 * i + 2;
                (left >= self.heap.len() || !less(&self.heap[left], &self.heap[i]))
                    && (right >= self.heap.len() || !less(&self.heap[right], &self.heap[i]))
            })
    }
}

struct State {
    workers: Vec<WorkerUrl>,
    load: HashMap<WorkerUrl, u32>,
    idle_queues: HashMap<Lambda, IdleQueue>,
    next_seq: u64,
}

impl State {
    fn load_of(&self, worker: &WorkerUrl) -> u32 {
        *self.load.get(worker).unwrap_or(&0)
    }

    /// Applies `delta` to `worker`'s load, then re-heapifies every entry in
    /// every per-function idle queue whose host matches — a load change for
    /// one worker can be reflected in several functions' warm-entry lists
    /// at once.
    fn adjust_load(&mut self, worker: &WorkerUrl, delta: i64) {
        let current = self.load_of(worker) as i64;
        let updated = (current + delta).max(0) as u32;
        self.load.insert(worker.clone(), updated);

        let host = worker.host();
        for queue in self.idle_queues.values_mut() {
            // Collect indices first: fixing one entry can move others
            // around via swaps, so re-scan is the only safe option, same
            // cost (O(queue size)) as the original per-mutation sweep.
            loop {
                let idx = queue
                    .heap
                    .iter()
                    .position(|e| e.worker.host() == host && e.load != updated);
                match idx {
                    Some(i) => queue.fix_load_at(i, updated),
                    None => break,
                }
            }
        }
    }
}

/// Prefers recently-warm workers per function; falls back to a
/// least-loaded scan (spec §4.1.d). Single mutex over pool, load map, and
/// every idle queue, matching spec §5's short-critical-section discipline.
#[derive(Debug)]
pub struct PullBasedBalancer {
    state: Mutex<State>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("workers", &self.workers).finish()
    }
}

impl PullBasedBalancer {
    pub fn new(workers: Vec<WorkerUrl>) -> Self {
        let load = workers.iter().cloned().map(|w| (w, 0)).collect();
        Self {
            state: Mutex::new(State {
                workers,
                load,
                idle_queues: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    fn select_least_loaded(state: &mut State) -> Result<WorkerUrl, SchedulerError> {
        let chosen = pick_least_loaded(&state.workers, |w| state.load_of(w))
            .cloned()
            .ok_or(SchedulerError::PoolEmpty)?;
        state.adjust_load(&chosen, 1);
        Ok(chosen)
    }
}

#[async_trait]
impl Balancer for PullBasedBalancer {
    async fn select_worker(
        &self,
        _ctx: &SelectionContext,
        lambda: &Lambda,
    ) -> Result<WorkerUrl, SchedulerError> {
        let mut state = self.state.lock();

        loop {
            let queue = state.idle_queues.entry(lambda.clone()).or_default();
            let Some(entry) = queue.pop() else {
                break;
            };

            if state.workers.contains(&entry.worker) {
                let worker = entry.worker;
                state.adjust_load(&worker, 1);
                return Ok(worker);
            }
            // Stale entry: the worker it names was removed since release.
            // Keep popping — it must be filtered silently, never returned.
        }

        if state.workers.is_empty() {
            return Err(SchedulerError::PoolEmpty);
        }

        Self::select_least_loaded(&mut state)
    }

    fn release_worker(&self, worker: &WorkerUrl, lambda: &Lambda) {
        let mut state = self.state.lock();
        state.adjust_load(worker, -1);

        let new_load = state.load_of(worker);
        let seq = state.next_seq;
        state.next_seq += 1;

        let queue = state.idle_queues.entry(lambda.clone()).or_default();
        queue.push(IdleEntry {
            worker: worker.clone(),
            load: new_load,
            seq,
            heap_index: 0,
        });
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
        // Idle entries for this worker are *not* purged here — they are
        // filtered lazily on pop, per spec §4.1.d.
    }

    fn get_all_workers(&self) -> Vec<WorkerUrl> {
        self.state.lock().workers.clone()
    }

    fn destroy_sandbox(&self, worker: &WorkerUrl, lambda: &Lambda) {
        let mut state = self.state.lock();
        let host = worker.host();
        if let Some(queue) = state.idle_queues.get_mut(lambda) {
            if let Some(idx) = queue.heap.iter().position(|e| e.worker.host() == host) {
                queue.remove_at(idx);
            }
        }
    }

    fn name(&self) -> &'static str {
        "pull_based"
    }
}
