//! Comparator-parameterized parallel in-memory sort.
//!
//! Large buffers are partitioned into one contiguous run per pool worker,
//! each run is stably sorted on the pool, and surviving runs are merged
//! pairwise until a single run remains. Merges take ties from the earlier
//! run first, so the whole sort is stable. Small buffers fall back to a
//! single-threaded stable sort.

use crate::pool::WorkerPool;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;

/// Buffers smaller than this are not worth parallelizing.
pub const MIN_PARALLEL_SORT_SIZE: usize = 30_000;

/// Stably sorts `items` under `compare`, using `pool` for buffers of at
/// least [`MIN_PARALLEL_SORT_SIZE`] elements.
pub fn parallel_sort<T, C>(items: &mut Vec<T>, compare: C, pool: Option<&WorkerPool>)
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    sort_with_threshold(items, compare, pool, MIN_PARALLEL_SORT_SIZE);
}

/// Implementation with an explicit parallelism threshold.
pub(crate) fn sort_with_threshold<T, C>(
    items: &mut Vec<T>,
    compare: C,
    pool: Option<&WorkerPool>,
    min_parallel: usize,
) where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    let pool = match pool {
        Some(pool) if pool.threads() > 1 && items.len() >= min_parallel => pool,
        _ => {
            items.sort_by(compare);
            return;
        }
    };

    let compare = Arc::new(compare);
    let partitions = pool.threads();
    let chunk_size = items.len().div_ceil(partitions);

    // Carve the buffer into contiguous runs and sort each on the pool.
    let mut runs: Vec<Vec<T>> = Vec::with_capacity(partitions);
    while !items.is_empty() {
        let tail = items.split_off(items.len().min(chunk_size));
        runs.push(std::mem::replace(items, tail));
    }

    let slots: Vec<Arc<Mutex<Option<Vec<T>>>>> =
        runs.iter().map(|_| Arc::new(Mutex::new(None))).collect();
    for (run, slot) in runs.into_iter().zip(&slots) {
        let slot = Arc::clone(slot);
        let compare = Arc::clone(&compare);
        pool.submit(move || {
            let mut run = run;
            run.sort_by(|a, b| (*compare)(a, b));
            *slot.lock() = Some(run);
        });
    }
    pool.wait_idle();

    let mut runs: Vec<Vec<T>> =
        slots.into_iter().map(|slot| slot.lock().take().unwrap_or_default()).collect();

    // Pairwise merge rounds until one run remains; adjacent runs keep their
    // relative order, preserving stability.
    while runs.len() > 1 {
        let mut next: Vec<Arc<Mutex<Option<Vec<T>>>>> = Vec::with_capacity(runs.len().div_ceil(2));
        let mut iter = runs.into_iter();
        while let Some(left) = iter.next() {
            let slot = Arc::new(Mutex::new(None));
            next.push(Arc::clone(&slot));
            match iter.next() {
                Some(right) => {
                    let compare = Arc::clone(&compare);
                    pool.submit(move || {
                        *slot.lock() = Some(merge_stable(left, right, &*compare));
                    });
                }
                None => *slot.lock() = Some(left),
            }
        }
        pool.wait_idle();
        runs = next.into_iter().map(|slot| slot.lock().take().unwrap_or_default()).collect();
    }

    *items = runs.pop().unwrap_or_default();
}

/// Merges two sorted runs; ties take the left (earlier) run's element first.
fn merge_stable<T, C>(left: Vec<T>, right: Vec<T>, compare: &C) -> Vec<T>
where
    C: Fn(&T, &T) -> Ordering,
{
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                if compare(l, r) == Ordering::Greater {
                    out.push(right.next().expect("peeked"));
                } else {
                    out.push(left.next().expect("peeked"));
                }
            }
            (Some(_), None) => {
                out.extend(left);
                return out;
            }
            (None, _) => {
                out.extend(right);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_first(a: &(u32, u32), b: &(u32, u32)) -> Ordering {
        a.0.cmp(&b.0)
    }

    #[test]
    fn test_small_buffer_single_threaded() {
        let pool = WorkerPool::new(4).unwrap();
        let mut items = vec![3u32, 1, 2];
        parallel_sort(&mut items, |a, b| a.cmp(b), Some(&pool));
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_matches_std_sort() {
        let pool = WorkerPool::new(4).unwrap();
        // Deterministic pseudo-random input.
        let mut state = 0x2545_F491u64;
        let mut items: Vec<u32> = (0..50_000)
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                (state >> 33) as u32 % 10_000
            })
            .collect();
        let mut expected = items.clone();
        expected.sort_unstable();

        parallel_sort(&mut items, |a, b| a.cmp(b), Some(&pool));
        assert_eq!(items, expected);
    }

    #[test]
    fn test_stability_across_partitions() {
        let pool = WorkerPool::new(4).unwrap();
        // Many duplicate keys tagged with their input position; a stable sort
        // keeps positions increasing within each key.
        let mut items: Vec<(u32, u32)> = (0..10_000).map(|i| (i % 7, i)).collect();
        sort_with_threshold(&mut items, by_first, Some(&pool), 100);

        for window in items.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(a.0 <= b.0);
            if a.0 == b.0 {
                assert!(a.1 < b.1, "stability violated: {a:?} before {b:?}");
            }
        }
    }

    #[test]
    fn test_comparator_agnostic() {
        let pool = WorkerPool::new(2).unwrap();
        let mut items: Vec<u32> = (0..5_000).collect();
        sort_with_threshold(&mut items, |a: &u32, b: &u32| b.cmp(a), Some(&pool), 100);
        assert_eq!(items[0], 4999);
        assert_eq!(*items.last().unwrap(), 0);
    }

    #[test]
    fn test_empty_and_singleton() {
        let pool = WorkerPool::new(2).unwrap();
        let mut empty: Vec<u32> = Vec::new();
        sort_with_threshold(&mut empty, |a: &u32, b: &u32| a.cmp(b), Some(&pool), 0);
        assert!(empty.is_empty());

        let mut one = vec![42u32];
        sort_with_threshold(&mut one, |a: &u32, b: &u32| a.cmp(b), Some(&pool), 0);
        assert_eq!(one, vec![42]);
    }

    #[test]
    fn test_no_pool_falls_back() {
        let mut items = vec![5u32, 4, 3, 2, 1];
        parallel_sort(&mut items, |a, b| a.cmp(b), None);
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_stable_takes_left_on_ties() {
        let left = vec![(1u32, 0u32), (2, 1)];
        let right = vec![(1u32, 2u32), (3, 3)];
        let merged = merge_stable(left, right, &by_first);
        assert_eq!(merged, vec![(1, 0), (1, 2), (2, 1), (3, 3)]);
    }
}
