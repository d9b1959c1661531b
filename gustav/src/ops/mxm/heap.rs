//! The heap-merge multiply: each output column merges the columns of `A`
//! selected by `B(:,j)` through a min-heap keyed on row index, so entries
//! stream out already sorted. Suits a `B` whose columns each touch many
//! contributors.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[cfg(feature = "parallel")]
use gustav_maybe_rayon::ParallelIterator;
use gustav_maybe_rayon::MaybeParIter;
use gustav_ring::semiring::{AddT, MultX, MultY, Semiring};
use gustav_ring::BinaryOp;
use gustav_util::{cumsum, partition_offsets};

use crate::context::Context;
use crate::error::{alloc_vec, Error, Result};
use crate::matrix::SparseRef;

#[allow(clippy::type_complexity)]
pub(super) fn heap<S: Semiring>(
    ctx: &Context,
    a: SparseRef<'_, MultX<S>>,
    b: SparseRef<'_, MultY<S>>,
) -> Result<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> {
    let nvec = b.nvec();

    let mut flops = alloc_vec(0i64, nvec + 1)?;
    for k in 0..nvec {
        let (lo, hi) = b.range(k);
        let mut f = 1i64;
        for pos in lo..hi {
            if let Some(ka) = a.find(b.i[pos]) {
                let (alo, ahi) = a.range(ka);
                f += (ahi - alo) as i64;
            }
        }
        flops[k] = f;
    }
    let total = cumsum(&mut flops) as usize;
    let ntasks = ctx.ntasks(total);
    let bounds = partition_offsets(&flops, ntasks);

    let windows: Vec<(usize, usize)> = bounds.windows(2).map(|win| (win[0], win[1])).collect();
    let results: Vec<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> = windows
        .par_iter()
        .map(|&(k0, k1)| {
            let mut counts = Vec::with_capacity(k1 - k0);
            let mut ci: Vec<i64> = Vec::new();
            let mut cx: Vec<AddT<S>> = Vec::new();
            // Merge state, reused across this task's columns.
            let mut cursors: Vec<usize> = Vec::new();
            let mut ends: Vec<usize> = Vec::new();
            let mut bvals: Vec<MultY<S>> = Vec::new();
            let mut merge: BinaryHeap<Reverse<(i64, usize)>> = BinaryHeap::new();

            for k in k0..k1 {
                let before = ci.len();
                cursors.clear();
                ends.clear();
                bvals.clear();
                merge.clear();

                let (blo, bhi) = b.range(k);
                for bpos in blo..bhi {
                    if let Some(ka) = a.find(b.i[bpos]) {
                        let (alo, ahi) = a.range(ka);
                        if alo < ahi {
                            let s = cursors.len();
                            cursors.push(alo);
                            ends.push(ahi);
                            bvals.push(b.x[bpos]);
                            merge.push(Reverse((a.i[alo], s)));
                        }
                    }
                }

                let mut current: Option<(i64, AddT<S>)> = None;
                while let Some(Reverse((row, s))) = merge.pop() {
                    let aik = a.x[cursors[s]];
                    let bkj = bvals[s];
                    match current.as_mut() {
                        Some((r, z)) if *r == row => S::multadd(z, aik, bkj),
                        _ => {
                            if let Some((r, z)) = current.take() {
                                ci.push(r);
                                cx.push(z);
                            }
                            current = Some((row, <S::Mult as BinaryOp>::apply(aik, bkj)));
                        }
                    }
                    cursors[s] += 1;
                    if cursors[s] < ends[s] {
                        merge.push(Reverse((a.i[cursors[s]], s)));
                    }
                }
                if let Some((r, z)) = current {
                    ci.push(r);
                    cx.push(z);
                }
                counts.push((ci.len() - before) as i64);
            }
            (counts, ci, cx)
        })
        .collect();

    let mut cp = alloc_vec(0i64, nvec + 1)?;
    for ((k0, k1), (counts, _, _)) in windows.iter().zip(&results) {
        cp[*k0..*k1].copy_from_slice(counts);
    }
    let cnz = cumsum(&mut cp) as usize;
    let mut ci = Vec::new();
    let mut cx = Vec::new();
    ci.try_reserve_exact(cnz).map_err(|_| Error::OutOfMemory)?;
    cx.try_reserve_exact(cnz).map_err(|_| Error::OutOfMemory)?;
    for (_, tci, tcx) in results {
        ci.extend(tci);
        cx.extend(tcx);
    }

    Ok((cp, ci, cx))
}
