//! The subset of rayon the engine relies on, behind a `parallel` feature.
//!
//! Call sites write `par_iter`-style code once; with the feature off every
//! method resolves to the serial std equivalent, so the engine builds and
//! runs single-threaded without rayon in the dependency graph.

#[cfg(not(feature = "parallel"))]
use std::ops::Range;
#[cfg(not(feature = "parallel"))]
use std::slice::{ChunksMut, Iter, IterMut};

#[cfg(feature = "parallel")]
pub use rayon::iter::{IndexedParallelIterator, ParallelIterator};
#[cfg(feature = "parallel")]
use rayon::{
    iter::{IntoParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator},
    slice::{ChunksMut as ParChunksMut, ParallelSliceMut},
};

/// Number of workers the pool will actually use.
pub fn num_threads() -> usize {
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads()
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

pub trait MaybeParIter<'data, T: 'data> {
    #[cfg(feature = "parallel")]
    type Iter: ParallelIterator<Item = &'data T>;
    #[cfg(not(feature = "parallel"))]
    type Iter: Iterator<Item = &'data T>;

    fn par_iter(&'data self) -> Self::Iter;
}

#[cfg(feature = "parallel")]
impl<'data, T: Sync + 'data> MaybeParIter<'data, T> for [T] {
    type Iter = rayon::slice::Iter<'data, T>;

    fn par_iter(&'data self) -> Self::Iter {
        IntoParallelRefIterator::par_iter(self)
    }
}

#[cfg(not(feature = "parallel"))]
impl<'data, T: 'data> MaybeParIter<'data, T> for [T] {
    type Iter = Iter<'data, T>;

    fn par_iter(&'data self) -> Self::Iter {
        self.iter()
    }
}

pub trait MaybeParIterMut<'data, T: 'data> {
    #[cfg(feature = "parallel")]
    type Iter: ParallelIterator<Item = &'data mut T>;
    #[cfg(not(feature = "parallel"))]
    type Iter: Iterator<Item = &'data mut T>;

    fn par_iter_mut(&'data mut self) -> Self::Iter;
}

#[cfg(feature = "parallel")]
impl<'data, T: Send + 'data> MaybeParIterMut<'data, T> for [T] {
    type Iter = rayon::slice::IterMut<'data, T>;

    fn par_iter_mut(&'data mut self) -> Self::Iter {
        IntoParallelRefMutIterator::par_iter_mut(self)
    }
}

#[cfg(not(feature = "parallel"))]
impl<'data, T: 'data> MaybeParIterMut<'data, T> for [T] {
    type Iter = IterMut<'data, T>;

    fn par_iter_mut(&'data mut self) -> Self::Iter {
        self.iter_mut()
    }
}

#[cfg(feature = "parallel")]
pub trait MaybeParChunksMut<T: Send> {
    fn par_chunks_mut(&mut self, chunk_size: usize) -> ParChunksMut<'_, T>;
}

#[cfg(not(feature = "parallel"))]
pub trait MaybeParChunksMut<T: Send> {
    fn par_chunks_mut(&mut self, chunk_size: usize) -> ChunksMut<'_, T>;
}

#[cfg(feature = "parallel")]
impl<T: Send> MaybeParChunksMut<T> for [T] {
    fn par_chunks_mut(&mut self, chunk_size: usize) -> ParChunksMut<'_, T> {
        ParallelSliceMut::par_chunks_mut(self, chunk_size)
    }
}

#[cfg(not(feature = "parallel"))]
impl<T: Send> MaybeParChunksMut<T> for [T] {
    fn par_chunks_mut(&mut self, chunk_size: usize) -> ChunksMut<'_, T> {
        self.chunks_mut(chunk_size)
    }
}

/// `0..n` as a (maybe) parallel iterator; the workhorse for per-task loops.
pub trait MaybeParRange {
    #[cfg(feature = "parallel")]
    type Iter: IndexedParallelIterator<Item = usize>;
    #[cfg(not(feature = "parallel"))]
    type Iter: Iterator<Item = usize>;

    fn into_par_iter(self) -> Self::Iter;
}

#[cfg(feature = "parallel")]
impl MaybeParRange for core::ops::Range<usize> {
    type Iter = rayon::range::Iter<usize>;

    fn into_par_iter(self) -> Self::Iter {
        IntoParallelIterator::into_par_iter(self)
    }
}

#[cfg(not(feature = "parallel"))]
impl MaybeParRange for Range<usize> {
    type Iter = Range<usize>;

    fn into_par_iter(self) -> Self::Iter {
        self
    }
}

#[cfg(feature = "parallel")]
pub fn join<A, B, RA, RB>(oper_a: A, oper_b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    rayon::join(oper_a, oper_b)
}

#[cfg(not(feature = "parallel"))]
pub fn join<A, B, RA, RB>(oper_a: A, oper_b: B) -> (RA, RB)
where
    A: FnOnce() -> RA,
    B: FnOnce() -> RB,
{
    (oper_a(), oper_b())
}
