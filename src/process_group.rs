//! Cooperating processes and their collective operations.
//!
//! A run is split over `size()` processes that share no memory. The only
//! communication the engine needs is an element-wise sum of `f64` buffers,
//! delivered either to every process or to the root only. Collectives block
//! until every process has reached them; a process that never arrives stalls
//! the others, there is no timeout.

use crate::error::{GasError, Result};
use std::sync::{Arc, Barrier, Mutex};

/// Which processes receive the result of a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceTarget {
    AllProcesses,
    Root,
}

pub trait ProcessGroup: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn is_multi_process(&self) -> bool {
        self.size() > 1
    }

    /// Element-wise sum over all processes, result available everywhere.
    fn sum_to_all(&self, data: &mut [f64]) -> Result<()>;

    /// Element-wise sum over all processes, result available on the root only.
    /// Non-root buffers are left as they were.
    fn sum_to_root(&self, data: &mut [f64]) -> Result<()>;

    fn barrier(&self) -> Result<()>;

    fn reduce(&self, data: &mut [f64], target: ReduceTarget) -> Result<()> {
        match target {
            ReduceTarget::AllProcesses => self.sum_to_all(data),
            ReduceTarget::Root => self.sum_to_root(data),
        }
    }

    /// Whether this process holds the result of a reduction to `target`.
    fn receives(&self, target: ReduceTarget) -> bool {
        match target {
            ReduceTarget::AllProcesses => true,
            ReduceTarget::Root => self.is_root(),
        }
    }
}

/// The whole run in one process; every collective is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_to_all(&self, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn sum_to_root(&self, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct Collective {
    barrier: Barrier,
    // one contribution per rank, summed in rank order
    contributions: Mutex<Vec<Vec<f64>>>,
}

/// In-memory group of cooperating processes, one handle per rank.
///
/// Each handle is meant to be moved to its own thread, which then plays the
/// part of that process. Sums are accumulated in rank order, so every rank
/// sees bit-identical results.
#[derive(Clone)]
pub struct LocalProcessGroup {
    rank: usize,
    size: usize,
    shared: Arc<Collective>,
}

impl LocalProcessGroup {
    pub fn create(size: usize) -> Vec<LocalProcessGroup> {
        let size = size.max(1);
        let shared = Arc::new(Collective {
            barrier: Barrier::new(size),
            contributions: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalProcessGroup {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Vec<f64>>>> {
        self.shared
            .contributions
            .lock()
            .map_err(|_| GasError::Collective(format!("rank {} found a poisoned accumulator", self.rank)))
    }

    fn sum_into(&self, data: &mut [f64], receive: bool) -> Result<()> {
        // errors are held until both barriers are passed, other ranks wait there
        let deposited = self.lock().map(|mut contributions| {
            contributions[self.rank].clear();
            contributions[self.rank].extend_from_slice(data);
        });
        self.shared.barrier.wait();

        let outcome = deposited.and_then(|()| {
            if !receive {
                return Ok(());
            }
            let contributions = self.lock()?;
            match contributions.iter().find(|c| c.len() != data.len()) {
                Some(other) => Err(GasError::Collective(format!(
                    "buffer length {} on rank {} does not match {} on another rank",
                    data.len(),
                    self.rank,
                    other.len()
                ))),
                None => {
                    for (i, value) in data.iter_mut().enumerate() {
                        *value = contributions.iter().map(|c| c[i]).sum();
                    }
                    Ok(())
                }
            }
        });

        // nobody may overwrite a contribution before every rank has read it
        self.shared.barrier.wait();
        outcome
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum_to_all(&self, data: &mut [f64]) -> Result<()> {
        self.sum_into(data, true)
    }

    fn sum_to_root(&self, data: &mut [f64]) -> Result<()> {
        let receive = self.is_root();
        self.sum_into(data, receive)
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}

impl std::fmt::Debug for LocalProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}
