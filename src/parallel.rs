//! Worker-pool configuration.
//!
//! Batched operations run on the global `rayon` pool. By default rayon sizes the pool
//! from the available hardware threads; [`configure_threads`] pins it explicitly and must
//! be called before the first parallel operation.

use crate::{Error, Result};

/// Rough number of scalar multiply-adds below which a task is not worth splitting.
const MIN_TASK_WORK: usize = 4096;

/// Build the global pool with `threads` workers.
pub fn configure_threads(threads: usize) -> Result<()> {
    if threads == 0 {
        return Err(Error::InvalidConfig("thread count must be > 0".to_owned()));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .map_err(|e| Error::InvalidConfig(format!("thread pool already initialized: {e}")))
}

/// Number of workers in the pool that batched operations run on.
pub fn current_threads() -> usize {
    rayon::current_num_threads()
}

/// Minimum items per parallel task, given the work done per item.
///
/// Small problems stay on one worker; large ones split down to single items.
#[inline]
pub(crate) fn min_len(work_per_item: usize) -> usize {
    (MIN_TASK_WORK / work_per_item.max(1)).max(1)
}
