//! The gather/scatter saxpy multiply: one output column at a time,
//! accumulated by row index into per-worker scratch.
//!
//! Two passes over the same flop structure: the first marks rows to size
//! each output column, the second scatters values and gathers them back in
//! sorted order. Tasks own contiguous column ranges balanced by flop count,
//! one scratch arena per task.

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

#[allow(clippy::type_complexity)]
pub(super) fn gustavson<S: Semiring>(
    ctx: &Context,
    a: SparseRef<'_, MultX<S>>,
    b: SparseRef<'_, MultY<S>>,
) -> Result<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> {
    let vlen = a.vlen;
    let nvec = b.nvec();

    // Flops per output column drive the partition.
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
    // One scratch arena per task, so the task count is capped at the
    // worker count.
    let ntasks = ctx.ntasks(total).min(ctx.num_threads()).max(1);
    let bounds = partition_offsets(&flops, ntasks);

    // Symbolic pass: column sizes.
    let windows: Vec<(usize, usize, usize)> = bounds
        .windows(2)
        .enumerate()
        .map(|(t, w)| (t, w[0], w[1]))
        .collect();
    let counts: Vec<Vec<i64>> = windows
        .par_iter()
        .map(|&(t, k0, k1)| -> Result<Vec<i64>> {
            let mut sauna = ctx.sauna(t);
            let space = sauna.space::<AddT<S>>(vlen)?;
            let (mark, hiwater) = (space.mark, space.hiwater);
            let mut counts = Vec::with_capacity(k1 - k0);
            for k in k0..k1 {
                *hiwater += 1;
                let gen = *hiwater;
                let mut n = 0i64;
                let (lo, hi) = b.range(k);
                for pos in lo..hi {
                    let Some(ka) = a.find(b.i[pos]) else { continue };
                    let (alo, ahi) = a.range(ka);
                    for apos in alo..ahi {
                        let i = a.i[apos] as usize;
                        if mark[i] != gen {
                            mark[i] = gen;
                            n += 1;
                        }
                    }
                }
                counts.push(n);
            }
            Ok(counts)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut cp = alloc_vec(0i64, nvec + 1)?;
    for ((_, k0, k1), cnts) in windows.iter().zip(&counts) {
        cp[*k0..*k1].copy_from_slice(cnts);
    }
    let cnz = cumsum(&mut cp) as usize;

    // Numeric pass into disjoint windows.
    let mut ci = alloc_vec(0i64, cnz)?;
    let mut cx = alloc_vec(AddT::<S>::default(), cnz)?;
    let offsets: Vec<usize> = bounds.iter().map(|&k| cp[k] as usize).collect();
    let ci_parts = split_mut_by(&mut ci, &offsets);
    let cx_parts = split_mut_by(&mut cx, &offsets);
    let mut items: Vec<(usize, usize, usize, &mut [i64], &mut [AddT<S>])> = windows
        .iter()
        .zip(ci_parts)
        .zip(cx_parts)
        .map(|((&(t, k0, k1), cis), cxs)| (t, k0, k1, cis, cxs))
        .collect();

    let fill = |(t, k0, k1, cis, cxs): &mut (usize, usize, usize, &mut [i64], &mut [AddT<S>])| -> Result<()> {
        let mut sauna = ctx.sauna(*t);
        let space = sauna.space::<AddT<S>>(vlen)?;
        let (mark, hiwater, work) = (space.mark, space.hiwater, space.work);
        let mut pos = 0usize;
        for k in *k0..*k1 {
            *hiwater += 1;
            let gen = *hiwater;
            let col_start = pos;
            let (lo, hi) = b.range(k);
            for bpos in lo..hi {
                let Some(ka) = a.find(b.i[bpos]) else { continue };
                let bkj = b.x[bpos];
                let (alo, ahi) = a.range(ka);
                for apos in alo..ahi {
                    let i = a.i[apos] as usize;
                    let aik = a.x[apos];
                    if mark[i] != gen {
                        mark[i] = gen;
                        work[i] = <S::Mult as BinaryOp>::apply(aik, bkj);
                        cis[pos] = i as i64;
                        pos += 1;
                    } else {
                        S::multadd(&mut work[i], aik, bkj);
                    }
                }
            }
            // Gather in index order.
            cis[col_start..pos].sort_unstable();
            for q in col_start..pos {
                cxs[q] = work[cis[q] as usize];
            }
        }
        debug_assert_eq!(pos, cis.len());
        Ok(())
    };

    let results: Vec<Result<()>> = items.par_iter_mut().map(fill).collect();
    for r in results {
        r?;
    }

    Ok((cp, ci, cx))
}
