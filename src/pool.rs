//! Explicit worker-pool abstraction over pre-partitioned work.
//!
//! Workers are stateless and operate on disjoint chunks; the only merge point
//! is the parent-side combine, which must be associative and commutative so
//! that partition boundaries and completion order cannot affect the result.

use rayon::prelude::*;

use crate::errors::CorpusError;

/// Fixed-size worker pool that maps chunks and merges per-chunk results.
pub struct WorkerPool {
    pool_size: usize,
}

impl WorkerPool {
    /// Create a pool with `pool_size` worker threads (minimum one).
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
        }
    }

    /// Number of worker threads this pool schedules onto.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Map every chunk on the pool and fold the results with `combine`.
    ///
    /// `map` receives the chunk's partition index. `combine` must be
    /// associative and commutative; results are merged by value, never by
    /// arrival order.
    pub fn map_reduce<I, R, M, C>(
        &self,
        chunks: Vec<I>,
        map: M,
        identity: impl Fn() -> R + Send + Sync,
        combine: C,
    ) -> Result<R, CorpusError>
    where
        I: Send,
        R: Send,
        M: Fn(usize, I) -> R + Send + Sync,
        C: Fn(R, R) -> R + Send + Sync,
    {
        let pool = self.build()?;
        Ok(pool.install(|| {
            chunks
                .into_par_iter()
                .enumerate()
                .map(|(idx, chunk)| map(idx, chunk))
                .reduce(&identity, &combine)
        }))
    }

    /// Run a fallible task per chunk, preserving partition order in the output.
    ///
    /// The first error aborts collection; per-item recovery belongs inside the
    /// task, where the unit of work is known.
    pub fn run_chunks<I, T, F>(&self, chunks: Vec<I>, task: F) -> Result<Vec<T>, CorpusError>
    where
        I: Send,
        T: Send,
        F: Fn(usize, I) -> Result<T, CorpusError> + Send + Sync,
    {
        let pool = self.build()?;
        pool.install(|| {
            chunks
                .into_par_iter()
                .enumerate()
                .map(|(idx, chunk)| task(idx, chunk))
                .collect::<Result<Vec<_>, _>>()
        })
    }

    fn build(&self) -> Result<rayon::ThreadPool, CorpusError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.pool_size)
            .build()
            .map_err(|err| CorpusError::Configuration(format!("worker pool build failed: {err}")))
    }
}

/// Split `items` into at most `num_chunks` contiguous, roughly equal groups.
///
/// Sizes differ by at most one and empty groups are never produced, so the
/// chunk id of every item is a pure function of the input order.
pub fn partition_count<T>(items: Vec<T>, num_chunks: usize) -> Vec<Vec<T>> {
    let num_chunks = num_chunks.max(1);
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let chunks = num_chunks.min(total);
    let base = total / chunks;
    let remainder = total % chunks;
    let mut out = Vec::with_capacity(chunks);
    let mut iter = items.into_iter();
    for idx in 0..chunks {
        let size = base + usize::from(idx < remainder);
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

/// Split `items` into contiguous groups of at most `chunk_size` elements.
pub fn partition_size<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(chunk_size);
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            out.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
