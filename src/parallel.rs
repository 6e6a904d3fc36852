//! # Partition / gather of per-row work
//!
//! Rows of a catalog are split into `P` contiguous blocks, each block is processed by its own
//! worker, and the coordinator gathers the blocks and restores the input order.
//!
//! Partition rule
//! -----------------
//! With `step = ceil(N / P)`, worker `r` gets `[r·step, (r+1)·step)` clipped to `N`, and the last
//! worker (`r = P − 1`) always extends to `N`. The ranges cover `[0, N)` without gap or overlap.
//!
//! Order restoration
//! -----------------
//! Every row carries a `sortIndex` column (`0..N`) added before partitioning. The gathered
//! blocks are concatenated, sorted by `sortIndex`, and the column is dropped, so the final order
//! does not depend on worker count or completion order.
//!
//! Failures
//! -----------------
//! * [`ErrorMode::Strict`] – the first failing worker (lowest rank) aborts the run with a
//!   [`NemoError::Worker`].
//! * [`ErrorMode::Relaxed`] – failures are logged with full detail and the failed block is left
//!   out of the gathered catalog.
//!
//! Nothing is ever retried.
use std::fmt;
use std::ops::Range;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::catalog::{Catalog, ColumnData};
use crate::constants::COL_SORT_INDEX;
use crate::nemo_errors::NemoError;

/// Role of a worker in a parallel run: rank 0 coordinates (gathers and writes output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Coordinator,
    Worker(usize),
}

impl Role {
    pub fn of(rank: usize) -> Self {
        if rank == 0 {
            Role::Coordinator
        } else {
            Role::Worker(rank)
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Role::Coordinator => 0,
            Role::Worker(r) => *r,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, Role::Coordinator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator (rank 0)"),
            Role::Worker(r) => write!(f, "worker (rank {r})"),
        }
    }
}

/// How worker failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    #[default]
    Strict,
    Relaxed,
}

/// Row range of worker `rank` out of `n_workers` for `n_rows` rows.
pub fn partition(n_rows: usize, n_workers: usize, rank: usize) -> Range<usize> {
    let n_workers = n_workers.max(1);
    let step = n_rows.div_ceil(n_workers);
    let start = (rank * step).min(n_rows);
    let end = if rank + 1 >= n_workers {
        n_rows
    } else {
        ((rank + 1) * step).min(n_rows)
    };
    start..end
}

/// Add (or overwrite) the `sortIndex` column with `0..N`.
pub fn add_sort_index(catalog: &mut Catalog) -> Result<(), NemoError> {
    let idx = (0..catalog.len()).map(|i| i as i64).collect();
    catalog.add_column(COL_SORT_INDEX, ColumnData::Int(idx))
}

/// Concatenate gathered blocks, sort by `sortIndex` and drop it.
pub fn restore_order(blocks: &[Catalog]) -> Result<Catalog, NemoError> {
    let merged = Catalog::concat(blocks)?;
    if merged.is_empty() && !merged.has_column(COL_SORT_INDEX) {
        return Ok(merged);
    }
    let mut sorted = merged.sort_by(COL_SORT_INDEX)?;
    sorted.drop_column(COL_SORT_INDEX);
    Ok(sorted)
}

/// Fixed-size pool of workers, one block per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    n_workers: usize,
    mode: ErrorMode,
}

impl WorkerPool {
    pub fn new(n_workers: usize, mode: ErrorMode) -> Result<Self, NemoError> {
        if n_workers == 0 {
            return Err(NemoError::WorkerPool("at least one worker is required".into()));
        }
        Ok(WorkerPool { n_workers, mode })
    }

    /// Single worker, strict errors.
    pub fn serial() -> Self {
        WorkerPool {
            n_workers: 1,
            mode: ErrorMode::Strict,
        }
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// Run `work` on every block of `catalog` and gather the results in input order.
    ///
    /// Arguments
    /// -----------------
    /// * `catalog` – rows to process; its own row order is the order restored at the end.
    /// * `work` – per-block computation; it receives the worker role and its block (with the
    ///   `sortIndex` column, which it must keep).
    ///
    /// Return
    /// ----------
    /// * The gathered catalog without `sortIndex`, or the first worker error in strict mode.
    pub fn run<F>(&self, catalog: &Catalog, work: F) -> Result<Catalog, NemoError>
    where
        F: Fn(Role, Catalog) -> Result<Catalog, NemoError> + Send + Sync,
    {
        let mut indexed = catalog.clone();
        add_sort_index(&mut indexed)?;
        let n_rows = indexed.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_workers)
            .thread_name(|i| format!("nemo-worker-{i}"))
            .build()
            .map_err(|e| NemoError::WorkerPool(e.to_string()))?;

        // collecting every block is the synchronisation point before the gather
        let results: Vec<(usize, Result<Catalog, NemoError>)> = pool.install(|| {
            (0..self.n_workers)
                .into_par_iter()
                .map(|rank| {
                    let range = partition(n_rows, self.n_workers, rank);
                    debug!("Rank {rank}: rows {range:?}");
                    let block = indexed.slice(range.start, range.end);
                    (rank, work(Role::of(rank), block))
                })
                .collect()
        });

        let mut blocks = Vec::with_capacity(results.len());
        for (rank, result) in results {
            match result {
                Ok(block) => {
                    if !Role::of(rank).is_coordinator() {
                        info!("Rank {rank} finished ({} rows)", block.len());
                    }
                    blocks.push(block);
                }
                Err(err) => match self.mode {
                    ErrorMode::Strict => {
                        return Err(NemoError::Worker {
                            rank,
                            source: Box::new(err),
                        })
                    }
                    ErrorMode::Relaxed => {
                        warn!("Rank {rank} failed, its rows are left out: {err:?}");
                    }
                },
            }
        }

        if n_rows > 0 && blocks.is_empty() {
            return Err(NemoError::WorkerPool("every worker failed".into()));
        }
        restore_order(&blocks)
    }
}
