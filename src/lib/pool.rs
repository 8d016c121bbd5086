//! Fixed-size worker pool for short-lived jobs.
//!
//! Chunk sorts and chunk writes are dispatched here rather than spawning ad
//! hoc threads. Jobs are independent; the pool guarantees no ordering between
//! them. [`WorkerPool::wait_idle`] blocks until every submitted job has run
//! to completion.

use crate::errors::{EngineError, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    pending: Mutex<usize>,
    idle: Condvar,
}

/// A fixed set of named worker threads executing submitted jobs.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Spawns `threads` workers (clamped to at least 1).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let state = Arc::new(PoolState { pending: Mutex::new(0), idle: Condvar::new() });

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let state = Arc::clone(&state);
            let handle = std::thread::Builder::new()
                .name(format!("pool-worker-{i}"))
                .spawn(move || worker_loop(&rx, &state))
                .map_err(|e| EngineError::resource(format!("cannot spawn worker thread: {e}")))?;
            handles.push(handle);
        }

        Ok(Self { tx: Some(tx), handles, state })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Enqueues a job. Jobs may run in any order.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.state.pending.lock() += 1;
        // The channel outlives every submit call; send only fails after drop.
        self.tx.as_ref().expect("pool already shut down").send(Box::new(job)).ok();
    }

    /// Blocks until the submission queue is empty and all workers are idle.
    pub fn wait_idle(&self) {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.idle.wait(&mut pending);
        }
    }
}

fn worker_loop(rx: &Receiver<Job>, state: &PoolState) {
    while let Ok(job) = rx.recv() {
        job();
        let mut pending = state.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            state.idle.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_all_run() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_wait_idle_on_empty_pool() {
        let pool = WorkerPool::new(2).unwrap();
        pool.wait_idle();
    }

    #[test]
    fn test_wait_idle_blocks_for_slow_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_thread_count_clamped() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_idle();
        drop(pool);
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }
}
