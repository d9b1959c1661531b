use std::mem;
use std::sync::{Mutex, MutexGuard};

use gustav_ring::Scalar;

use crate::error::{reserve, Result};

/// Default work-unit target per task (roughly: entries visited).
pub const DEFAULT_CHUNK: usize = 65536;

/// Execution state shared by all operations: the worker budget, the task
/// granularity hint, and one scratch arena per worker.
///
/// A context is passed explicitly to every operation; matrices do not hold
/// one. Scratch is only (re)sized here at call boundaries, never inside
/// kernels.
pub struct Context {
    nthreads: usize,
    chunk: usize,
    saunas: Vec<Mutex<Sauna>>,
}

impl Context {
    /// `nthreads = 0` means "use the pool's native width"; `chunk = 0` means
    /// the default chunk.
    pub fn new(nthreads: usize, chunk: usize) -> Self {
        let nthreads = if nthreads == 0 {
            gustav_maybe_rayon::num_threads()
        } else {
            nthreads
        };
        let chunk = if chunk == 0 { DEFAULT_CHUNK } else { chunk };
        let saunas = (0..nthreads).map(|_| Mutex::new(Sauna::new())).collect();
        Self {
            nthreads,
            chunk,
            saunas,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.nthreads
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Number of tasks for `total_work` work units: one per chunk, capped at
    /// eight per worker so the static partition stays balanced.
    pub(crate) fn ntasks(&self, total_work: usize) -> usize {
        let by_chunk = total_work / self.chunk;
        by_chunk.clamp(1, 8 * self.nthreads)
    }

    /// The scratch arena for `worker`. Tasks are numbered so that no two
    /// concurrent tasks share a worker slot; the lock is uncontended.
    pub(crate) fn sauna(&self, worker: usize) -> MutexGuard<'_, Sauna> {
        self.saunas[worker % self.saunas.len()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Per-worker scratch: a generation-marked row set plus a value workspace,
/// reused across calls without clearing.
///
/// `mark[i] == hiwater` means row `i` is occupied in the current vector;
/// bumping `hiwater` retires the whole set in O(1).
pub struct Sauna {
    mark: Vec<i64>,
    hiwater: i64,
    work: Vec<u8>,
}

pub(crate) struct SaunaSpace<'a, T> {
    pub mark: &'a mut [i64],
    pub hiwater: &'a mut i64,
    pub work: &'a mut [T],
}

impl<T> SaunaSpace<'_, T> {
    /// Starts a fresh vector: every `mark` entry becomes stale at once.
    #[inline]
    pub fn new_generation(&mut self) -> i64 {
        *self.hiwater += 1;
        *self.hiwater
    }
}

impl Sauna {
    fn new() -> Self {
        Self {
            mark: Vec::new(),
            hiwater: 0,
            work: Vec::new(),
        }
    }

    /// Scratch for vectors of length `vlen` with accumulator type `T`.
    ///
    /// The value workspace is a byte arena reinterpreted per call; it is
    /// zero-filled first so every bit pattern handed out is a valid `T`
    /// (all scalar types accept the all-zero pattern).
    pub(crate) fn space<T: Scalar>(&mut self, vlen: usize) -> Result<SaunaSpace<'_, T>> {
        if self.mark.len() < vlen {
            let extra = vlen - self.mark.len();
            reserve(&mut self.mark, extra)?;
            self.mark.resize(vlen, 0);
        }
        let bytes = vlen * mem::size_of::<T>() + mem::align_of::<T>();
        if self.work.len() < bytes {
            let extra = bytes - self.work.len();
            reserve(&mut self.work, extra)?;
            self.work.resize(bytes, 0);
        }
        self.work[..bytes].fill(0);
        // Alignment of the middle region is guaranteed by align_to; the
        // padding byte allowance above makes it long enough.
        let (_, mid, _) = unsafe { self.work[..bytes].align_to_mut::<T>() };
        Ok(SaunaSpace {
            mark: &mut self.mark[..vlen],
            hiwater: &mut self.hiwater,
            work: &mut mid[..vlen],
        })
    }
}
