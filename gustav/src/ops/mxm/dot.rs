//! The inner-product multiply `C = W ⊕.⊗ B` where the vectors of `W` are
//! the rows of `C` (that is, `W = A'`). Scratch-free: each output cell is a
//! reduction over one index intersection, with the monoid's terminal value
//! cutting the walk short when nothing can change anymore.

#[cfg(feature = "parallel")]
use gustav_maybe_rayon::ParallelIterator;
use gustav_maybe_rayon::MaybeParIter;
use gustav_ring::semiring::{AddT, MultX, MultY, Semiring};
use gustav_ring::Monoid;
use gustav_util::{cumsum, partition_offsets};

use crate::context::Context;
use crate::error::{alloc_vec, Result};
use crate::matrix::SparseRef;

#[allow(clippy::type_complexity)]
pub(super) fn dot<S: Semiring>(
    ctx: &Context,
    w: SparseRef<'_, MultX<S>>,
    b: SparseRef<'_, MultY<S>>,
) -> Result<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> {
    let nvec = b.nvec();
    let nwvec = w.nvec();

    let mut est = alloc_vec(0i64, nvec + 1)?;
    for k in 0..nvec {
        let (lo, hi) = b.range(k);
        est[k] = 1 + (hi - lo) as i64 + nwvec as i64;
    }
    let total = cumsum(&mut est) as usize;
    let ntasks = ctx.ntasks(total);
    let bounds = partition_offsets(&est, ntasks);

    let windows: Vec<(usize, usize)> = bounds.windows(2).map(|win| (win[0], win[1])).collect();
    let results: Vec<(Vec<i64>, Vec<i64>, Vec<AddT<S>>)> = windows
        .par_iter()
        .map(|&(k0, k1)| {
            let mut counts = Vec::with_capacity(k1 - k0);
            let mut ci: Vec<i64> = Vec::new();
            let mut cx: Vec<AddT<S>> = Vec::new();
            for k in k0..k1 {
                let before = ci.len();
                let (blo, bhi) = b.range(k);
                if bhi > blo {
                    for kk in 0..nwvec {
                        let (wlo, whi) = w.range(kk);
                        let mut z = <S::Add as Monoid>::identity();
                        let mut any = false;
                        let (mut pa, mut pb) = (wlo, blo);
                        while pa < whi && pb < bhi {
                            match w.i[pa].cmp(&b.i[pb]) {
                                std::cmp::Ordering::Less => pa += 1,
                                std::cmp::Ordering::Greater => pb += 1,
                                std::cmp::Ordering::Equal => {
                                    S::multadd(&mut z, w.x[pa], b.x[pb]);
                                    any = true;
                                    if <S::Add as Monoid>::terminal(z) {
                                        // Nothing later in the walk can
                                        // move the reduction.
                                        break;
                                    }
                                    pa += 1;
                                    pb += 1;
                                }
                            }
                        }
                        if any {
                            ci.push(w.vec_id(kk));
                            cx.push(z);
                        }
                    }
                }
                counts.push((ci.len() - before) as i64);
            }
            (counts, ci, cx)
        })
        .collect();

    // Stitch the per-task buffers in column order.
    let mut cp = alloc_vec(0i64, nvec + 1)?;
    for ((k0, k1), (counts, _, _)) in windows.iter().zip(&results) {
        cp[*k0..*k1].copy_from_slice(counts);
    }
    let cnz = cumsum(&mut cp) as usize;
    let mut ci = Vec::new();
    let mut cx = Vec::new();
    ci.try_reserve_exact(cnz).map_err(|_| crate::error::Error::OutOfMemory)?;
    cx.try_reserve_exact(cnz).map_err(|_| crate::error::Error::OutOfMemory)?;
    for (_, tci, tcx) in results {
        ci.extend(tci);
        cx.extend(tcx);
    }
    debug_assert_eq!(ci.len(), cnz);

    Ok((cp, ci, cx))
}
