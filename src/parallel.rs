use crate::error::{EnsembleError, Result};
use crate::lazy::{Block, Task};
use rayon::prelude::*;

/// Evaluate independent tasks in parallel on the current rayon pool
///
/// Results keep the order of `tasks`. The first failure aborts the batch.
pub fn compute_blocks(tasks: &[Task]) -> Result<Vec<Block>> {
    tasks.par_iter().map(Task::compute).collect()
}

/// Build a dedicated pool for forced evaluation
///
/// Graphs computed inside `pool.install` fan out over this pool only.
/// `None` lets rayon pick one thread per logical CPU.
pub fn build_thread_pool(num_threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("ensgrid-compute-{}", i));
    if let Some(n) = num_threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| EnsembleError::Config(format!("cannot build thread pool: {}", e)))
}
