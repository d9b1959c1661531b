//! Diagonal specializations: `C = A·D` scales each column of `A` by one
//! diagonal value, `C = D·B` scales each row of `B`. The output pattern is
//! the scaled operand's pattern, minus columns or rows whose diagonal entry
//! is missing.

#[cfg(feature = "parallel")]
use gustav_maybe_rayon::ParallelIterator;
use gustav_maybe_rayon::{MaybeParIter, MaybeParIterMut};
use gustav_ring::semiring::{AddT, MultX, MultY, Semiring};
use gustav_ring::BinaryOp;
use gustav_util::{cumsum, partition_offsets};

use crate::context::Context;
use crate::error::{alloc_vec, Result};
use crate::matrix::SparseRef;
use crate::ops::split_mut_by;

/// `C = A·D`, column scale: `cij = mult(aij, d_jj)`.
#[allow(clippy::type_complexity)]
pub(super) fn colscale<S: Semiring>(
    ctx: &Context,
    a: SparseRef<'_, MultX<S>>,
    d: SparseRef<'_, MultY<S>>,
) -> Result<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> {
    let nvec = a.nvec();
    let diag = |j: i64| -> Option<MultY<S>> {
        let kd = d.find(j)?;
        let (lo, hi) = d.range(kd);
        (hi > lo).then(|| d.x[lo])
    };

    let mut cp = alloc_vec(0i64, nvec + 1)?;
    for k in 0..nvec {
        let (lo, hi) = a.range(k);
        cp[k] = if diag(a.vec_id(k)).is_some() {
            (hi - lo) as i64
        } else {
            0
        };
    }
    let mut work = cp.clone();
    let total = cumsum(&mut work) as usize;
    let cnz = cumsum(&mut cp) as usize;
    let ntasks = ctx.ntasks(total);
    let bounds = partition_offsets(&work, ntasks);

    let mut ci = alloc_vec(0i64, cnz)?;
    let mut cx = alloc_vec(AddT::<S>::default(), cnz)?;
    let offsets: Vec<usize> = bounds.iter().map(|&k| cp[k] as usize).collect();
    let ci_parts = split_mut_by(&mut ci, &offsets);
    let cx_parts = split_mut_by(&mut cx, &offsets);
    let mut items: Vec<(usize, usize, &mut [i64], &mut [AddT<S>])> = bounds
        .windows(2)
        .zip(ci_parts)
        .zip(cx_parts)
        .map(|((win, cis), cxs)| (win[0], win[1], cis, cxs))
        .collect();

    items.par_iter_mut().for_each(|(k0, k1, cis, cxs)| {
        let mut pos = 0usize;
        for k in *k0..*k1 {
            let Some(djj) = diag(a.vec_id(k)) else { continue };
            let (lo, hi) = a.range(k);
            for apos in lo..hi {
                cis[pos] = a.i[apos];
                cxs[pos] = <S::Mult as BinaryOp>::apply(a.x[apos], djj);
                pos += 1;
            }
        }
        debug_assert_eq!(pos, cis.len());
    });

    Ok((cp, ci, cx))
}

/// `C = D·B`, row scale: `cij = mult(d_ii, bij)`.
#[allow(clippy::type_complexity)]
pub(super) fn rowscale<S: Semiring>(
    ctx: &Context,
    d: SparseRef<'_, MultX<S>>,
    b: SparseRef<'_, MultY<S>>,
) -> Result<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> {
    let nvec = b.nvec();

    // Dense row lookup of the diagonal.
    let mut lookup: Vec<Option<MultX<S>>> = alloc_vec(None, b.vlen)?;
    for kd in 0..d.nvec() {
        let (lo, hi) = d.range(kd);
        if hi > lo {
            lookup[d.vec_id(kd) as usize] = Some(d.x[lo]);
        }
    }

    let mut cp = alloc_vec(0i64, nvec + 1)?;
    for k in 0..nvec {
        let (lo, hi) = b.range(k);
        cp[k] = (lo..hi)
            .filter(|&pos| lookup[b.i[pos] as usize].is_some())
            .count() as i64;
    }
    let mut work = alloc_vec(0i64, nvec + 1)?;
    for k in 0..nvec {
        let (lo, hi) = b.range(k);
        work[k] = (hi - lo + 1) as i64;
    }
    let total = cumsum(&mut work) as usize;
    let cnz = cumsum(&mut cp) as usize;
    let ntasks = ctx.ntasks(total);
    let bounds = partition_offsets(&work, ntasks);

    let mut ci = alloc_vec(0i64, cnz)?;
    let mut cx = alloc_vec(AddT::<S>::default(), cnz)?;
    let offsets: Vec<usize> = bounds.iter().map(|&k| cp[k] as usize).collect();
    let ci_parts = split_mut_by(&mut ci, &offsets);
    let cx_parts = split_mut_by(&mut cx, &offsets);
    let mut items: Vec<(usize, usize, &mut [i64], &mut [AddT<S>])> = bounds
        .windows(2)
        .zip(ci_parts)
        .zip(cx_parts)
        .map(|((win, cis), cxs)| (win[0], win[1], cis, cxs))
        .collect();

    items.par_iter_mut().for_each(|(k0, k1, cis, cxs)| {
        let mut pos = 0usize;
        for k in *k0..*k1 {
            let (lo, hi) = b.range(k);
            for bpos in lo..hi {
                if let Some(dii) = lookup[b.i[bpos] as usize] {
                    cis[pos] = b.i[bpos];
                    cxs[pos] = <S::Mult as BinaryOp>::apply(dii, b.x[bpos]);
                    pos += 1;
                }
            }
        }
        debug_assert_eq!(pos, cis.len());
    });

    Ok((cp, ci, cx))
}
