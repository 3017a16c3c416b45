//! Two-level data parallelism over cell indices.
//!
//! `[0, num_items)` is first split into one contiguous block per process, then
//! each process splits its block into one contiguous range per local worker
//! thread. Workers run on a dedicated rayon pool; a pass returns once every
//! worker has finished. Cross-process reduction is never implicit, callers ask
//! for it with an explicit [`ReduceTarget`].

use crate::error::{GasError, Result};
use crate::process_group::{ProcessGroup, ReduceTarget, SingleProcess};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;

/// Block `part` of `num_items` split into `parts` contiguous blocks whose sizes
/// differ by at most one; the larger blocks come first.
pub fn block_range(num_items: usize, parts: usize, part: usize) -> Range<usize> {
    if parts == 0 || part >= parts {
        return num_items..num_items;
    }
    let base = num_items / parts;
    let extra = num_items % parts;
    let start = part * base + part.min(extra);
    let len = base + usize::from(part < extra);
    start..start + len
}

/// The cells one process owns and how they are divided over its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkAssignment {
    pub num_items: usize,
    pub rank_range: Range<usize>,
    /// one entry per worker, possibly empty, ascending and contiguous
    pub worker_ranges: Vec<Range<usize>>,
}

impl WorkAssignment {
    pub fn for_rank(num_items: usize, num_processes: usize, rank: usize, num_workers: usize) -> Self {
        let rank_range = block_range(num_items, num_processes.max(1), rank);
        let workers = num_workers.max(1);
        let worker_ranges = (0..workers)
            .map(|w| {
                let local = block_range(rank_range.len(), workers, w);
                rank_range.start + local.start..rank_range.start + local.end
            })
            .collect();
        Self {
            num_items,
            rank_range,
            worker_ranges,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.worker_ranges.len()
    }

    pub fn local_items(&self) -> usize {
        self.rank_range.len()
    }
}

pub struct DistributedExecutor {
    group: Arc<dyn ProcessGroup>,
    pool: rayon::ThreadPool,
    num_workers: usize,
}

impl DistributedExecutor {
    /// `threads == 0` lets rayon pick the worker count.
    pub fn new(group: Arc<dyn ProcessGroup>, threads: usize) -> Result<Self> {
        let rank = group.rank();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("gas-worker-{rank}-{i}"))
            .build()
            .map_err(|e| GasError::WorkerPool(e.to_string()))?;
        let num_workers = pool.current_num_threads();
        log::debug!(
            "executor on rank {}/{} with {} workers",
            rank,
            group.size(),
            num_workers
        );
        Ok(Self {
            group,
            pool,
            num_workers,
        })
    }

    pub fn single_process(threads: usize) -> Result<Self> {
        Self::new(Arc::new(SingleProcess), threads)
    }

    pub fn group(&self) -> &dyn ProcessGroup {
        self.group.as_ref()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn assignment(&self, num_items: usize) -> WorkAssignment {
        WorkAssignment::for_rank(num_items, self.group.size(), self.group.rank(), self.num_workers)
    }

    /// Calls `callback(first, count)` once per non-empty worker range of this
    /// process and waits for all of them.
    pub fn run_distributed<F>(&self, num_items: usize, callback: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Sync,
    {
        let assignment = self.assignment(num_items);
        let lanes = vec![(); assignment.num_workers()];
        self.run_lanes(&assignment, lanes, |_, first, count| callback(first, count))
    }

    /// Like [`run_distributed`](Self::run_distributed), but worker `w` also
    /// receives `lanes[w]` by value. Every worker runs to completion or to its
    /// first error; the error of the lowest-numbered failing worker is returned.
    pub fn run_lanes<L, F>(&self, assignment: &WorkAssignment, lanes: Vec<L>, callback: F) -> Result<()>
    where
        L: Send,
        F: Fn(L, usize, usize) -> Result<()> + Sync,
    {
        if lanes.len() != assignment.num_workers() {
            return Err(GasError::InvalidPartition(format!(
                "{} lanes for {} worker ranges",
                lanes.len(),
                assignment.num_workers()
            )));
        }

        let results: Vec<Result<()>> = self.pool.install(|| {
            lanes
                .into_par_iter()
                .zip(assignment.worker_ranges.par_iter())
                .map(|(lane, range)| {
                    if range.is_empty() {
                        Ok(())
                    } else {
                        callback(lane, range.start, range.len())
                    }
                })
                .collect()
        });

        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    pub fn reduce(&self, data: &mut [f64], target: ReduceTarget) -> Result<()> {
        self.group.reduce(data, target)
    }

    pub fn barrier(&self) -> Result<()> {
        self.group.barrier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_le;
    use std::sync::Mutex;

    #[test]
    fn block_sizes_differ_by_at_most_one() {
        let sizes: Vec<usize> = (0..4).map(|p| block_range(10, 4, p).len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
        assert_eq!(block_range(10, 4, 0), 0..3);
        assert_eq!(block_range(10, 4, 3), 8..10);
        assert_le!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap(), 1);
    }

    #[test]
    fn more_parts_than_items_leaves_empty_blocks() {
        let a = WorkAssignment::for_rank(2, 1, 0, 4);
        assert_eq!(a.worker_ranges, vec![0..1, 1..2, 2..2, 2..2]);
    }

    #[test]
    fn worker_ranges_stay_inside_rank_range() {
        let a = WorkAssignment::for_rank(11, 3, 1, 2);
        assert_eq!(a.rank_range, 4..8);
        assert_eq!(a.worker_ranges, vec![4..6, 6..8]);
    }

    #[test]
    fn every_item_visited_once() {
        let executor = DistributedExecutor::single_process(3).unwrap();
        let seen = Mutex::new(vec![0usize; 17]);
        executor
            .run_distributed(17, |first, count| {
                let mut seen = seen.lock().unwrap();
                for i in first..first + count {
                    seen[i] += 1;
                }
                Ok(())
            })
            .unwrap();
        assert!(seen.into_inner().unwrap().iter().all(|&n| n == 1));
    }

    #[test]
    fn zero_items_is_a_no_op() {
        let executor = DistributedExecutor::single_process(2).unwrap();
        executor
            .run_distributed(0, |_, _| Err(GasError::Solver("should not run".into())))
            .unwrap();
    }

    #[test]
    fn lowest_failing_worker_error_wins() {
        let executor = DistributedExecutor::single_process(4).unwrap();
        let assignment = executor.assignment(8);
        let lanes: Vec<usize> = (0..assignment.num_workers()).collect();
        let done = Mutex::new(vec![false; 8]);
        let err = executor
            .run_lanes(&assignment, lanes, |lane, first, count| {
                for m in first..first + count {
                    // worker 1 fails on its first cell, worker 3 on its last
                    if (lane == 1 && m == first) || (lane == 3 && m == first + count - 1) {
                        return Err(GasError::Solver(format!("worker {lane} at {m}")));
                    }
                    done.lock().unwrap()[m] = true;
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "equilibrium solver failure: worker 1 at 2");

        // siblings of a failing worker still finish their ranges
        let done = done.into_inner().unwrap();
        assert_eq!(done, vec![true, true, false, false, true, true, true, false]);
    }

    #[test]
    fn lane_count_must_match() {
        let executor = DistributedExecutor::single_process(2).unwrap();
        let assignment = executor.assignment(4);
        let result = executor.run_lanes(&assignment, vec![(); 5], |_, _, _| Ok(()));
        assert!(matches!(result, Err(GasError::InvalidPartition(_))));
    }
}
