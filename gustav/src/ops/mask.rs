//! The masked write-back `C⟨M⟩ = accum(C, T)` every operator funnels
//! through.
//!
//! With an accumulator, `Z = C ∪ T` combining collisions with `accum`;
//! without one, `Z = T`. The mask then chooses per cell between `Z` and the
//! old `C` (or nothing, under `REPLACE`). Vectors are processed as a
//! three-stream merge, parallel over coarse vector ranges with a count pass
//! and a fill pass.

#[cfg(feature = "parallel")]
use gustav_maybe_rayon::ParallelIterator;
use gustav_maybe_rayon::{MaybeParIter, MaybeParIterMut};
use gustav_ring::Scalar;
use gustav_util::{cumsum, partition_offsets};

use crate::burble::burble_log;
use crate::context::Context;
use crate::error::{alloc_vec, Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, SparseRef, Store};
use crate::ops::descriptor::{Descriptor, OutputOption};
use crate::ops::{split_mut_by, Accumulator};

/// Applies `c⟨mask⟩ = accum(c, t)`. `t` must have `c`'s logical shape; its
/// orientation is aligned here. The caller conforms `c` afterwards.
pub(crate) fn accum_mask<T: Scalar, Acc: Accumulator<T>>(
    ctx: &Context,
    c: &mut Matrix<T>,
    t: Matrix<T>,
    mask: Option<&Matrix<bool>>,
    desc: &Descriptor,
) -> Result<()> {
    debug_assert_eq!((t.nrows(), t.ncols()), (c.nrows(), c.ncols()));
    if let Some(m) = mask {
        if (m.nrows(), m.ncols()) != (c.nrows(), c.ncols()) {
            return Err(Error::DimensionMismatch(format!(
                "mask is {}x{}, output is {}x{}",
                m.nrows(),
                m.ncols(),
                c.nrows(),
                c.ncols()
            )));
        }
    }

    let t = if t.orientation() == c.orientation() {
        t
    } else {
        t.reoriented(c.orientation())?.into_owned()
    };

    // No mask and no accumulator: T simply becomes C.
    if mask.is_none() && !Acc::ACTIVE {
        c.store = t.store;
        return Ok(());
    }

    let replace = desc.outp == OutputOption::Replace;
    let structural = desc.mask.structural;
    let complement = desc.mask.complement;

    // Everything sparse, in c's orientation.
    c.wait()?;
    if matches!(c.store, Store::Bitmap { .. } | Store::Full { .. }) {
        c.to_sparse()?;
    }
    let t_sparse = t.as_sparse()?;
    let m_owned = match mask {
        Some(m) => {
            let mut m = m.reoriented(c.orientation())?.into_owned();
            m.wait()?;
            if matches!(m.store, Store::Bitmap { .. } | Store::Full { .. }) {
                m.to_sparse()?;
            }
            Some(m)
        }
        None => None,
    };

    let (new_p, new_i, new_x) = {
        let cref = match c.sparse_ref() {
            Some(r) => r,
            None => {
                return Err(Error::InvariantViolation(
                    "write-back target not clean".into(),
                ))
            }
        };
        let tref = match t_sparse.sparse_ref() {
            Some(r) => r,
            None => {
                return Err(Error::InvariantViolation(
                    "computed result not clean".into(),
                ))
            }
        };
        let mref = m_owned.as_ref().and_then(|m| m.sparse_ref());

        merge_all(
            ctx, cref, tref, mref, structural, complement, replace,
            |cij, tij| Acc::combine(cij, tij),
            Acc::ACTIVE,
        )?
    };

    c.store = Store::Sparse {
        p: new_p,
        i: new_i,
        x: new_x,
        pending: Pending::new(),
    };
    Ok(())
}

#[allow(clippy::too_many_arguments, clippy::type_complexity)]
fn merge_all<T: Scalar>(
    ctx: &Context,
    c: SparseRef<'_, T>,
    t: SparseRef<'_, T>,
    m: Option<SparseRef<'_, bool>>,
    structural: bool,
    complement: bool,
    replace: bool,
    combine: impl Fn(T, T) -> T + Send + Sync,
    accum_active: bool,
) -> Result<(Vec<i64>, Vec<i64>, Vec<T>)> {
    let vdim = c.vdim;

    // Work estimate per vector, cumulative, for the static partition.
    let mut work = alloc_vec(0i64, vdim + 1)?;
    for j in 0..vdim {
        let (clo, chi) = vrange(&c, j as i64);
        let (tlo, thi) = vrange(&t, j as i64);
        let mnz = m.as_ref().map_or(0, |m| {
            let (lo, hi) = vrange(m, j as i64);
            hi - lo
        });
        work[j] = ((chi - clo) + (thi - tlo) + mnz + 1) as i64;
    }
    let total = cumsum(&mut work) as usize;
    let ntasks = ctx.ntasks(total);
    let bounds = partition_offsets(&work, ntasks);
    burble_log!("mask: {ntasks} tasks over {vdim} vectors");

    // Count pass.
    let task_counts: Vec<Vec<i64>> = bounds
        .windows(2)
        .collect::<Vec<_>>()
        .par_iter()
        .map(|win| {
            let (k0, k1) = (win[0], win[1]);
            let mut counts = Vec::with_capacity(k1 - k0);
            for j in k0..k1 {
                let mut n = 0usize;
                merge_vector(
                    &c, &t, m.as_ref(), j as i64, structural, complement, replace, &combine,
                    accum_active, &mut |_i, _v: T| n += 1,
                );
                counts.push(n as i64);
            }
            counts
        })
        .collect();

    let mut cp = alloc_vec(0i64, vdim + 1)?;
    for (win, counts) in bounds.windows(2).zip(&task_counts) {
        cp[win[0]..win[1]].copy_from_slice(counts);
    }
    let cnz = cumsum(&mut cp) as usize;

    let mut ci = alloc_vec(0i64, cnz)?;
    let mut cx = alloc_vec(T::default(), cnz)?;

    // Fill pass, each task writing its disjoint window.
    let offsets: Vec<usize> = bounds.iter().map(|&k| cp[k] as usize).collect();
    let ci_parts = split_mut_by(&mut ci, &offsets);
    let cx_parts = split_mut_by(&mut cx, &offsets);
    let mut items: Vec<(usize, usize, &mut [i64], &mut [T])> = bounds
        .windows(2)
        .zip(ci_parts)
        .zip(cx_parts)
        .map(|((win, cis), cxs)| (win[0], win[1], cis, cxs))
        .collect();

    items.par_iter_mut().for_each(|(k0, k1, cis, cxs)| {
        let mut pos = 0usize;
        for j in *k0..*k1 {
            merge_vector(
                &c, &t, m.as_ref(), j as i64, structural, complement, replace, &combine,
                accum_active, &mut |i, v: T| {
                    cis[pos] = i;
                    cxs[pos] = v;
                    pos += 1;
                },
            );
        }
        debug_assert_eq!(pos, cis.len());
    });

    Ok((cp, ci, cx))
}

fn vrange<T>(r: &SparseRef<'_, T>, j: i64) -> (usize, usize) {
    match r.find(j) {
        Some(k) => r.range(k),
        None => (0, 0),
    }
}

/// Emits the write-back result for vector `j` into `emit`, walking the old
/// output, the computed result, and the mask as sorted streams.
#[allow(clippy::too_many_arguments)]
fn merge_vector<T: Scalar>(
    c: &SparseRef<'_, T>,
    t: &SparseRef<'_, T>,
    m: Option<&SparseRef<'_, bool>>,
    j: i64,
    structural: bool,
    complement: bool,
    replace: bool,
    combine: &impl Fn(T, T) -> T,
    accum_active: bool,
    emit: &mut impl FnMut(i64, T),
) {
    let (clo, chi) = vrange(c, j);
    let (tlo, thi) = vrange(t, j);
    let (mlo, mhi) = m.map_or((0, 0), |m| vrange(m, j));

    let mut a = clo;
    let mut b = tlo;
    let mut mc = mlo;

    let allow = |i: i64, mc: &mut usize| -> bool {
        match m {
            None => true,
            Some(m) => {
                while *mc < mhi && m.i[*mc] < i {
                    *mc += 1;
                }
                let present = *mc < mhi && m.i[*mc] == i;
                let hit = if !present {
                    false
                } else if structural {
                    true
                } else {
                    m.x[*mc]
                };
                hit != complement
            }
        }
    };

    while a < chi || b < thi {
        let ia = if a < chi { c.i[a] } else { i64::MAX };
        let ib = if b < thi { t.i[b] } else { i64::MAX };
        let i = ia.min(ib);
        let c_has = ia == i;
        let t_has = ib == i;
        let cv = if c_has { c.x[a] } else { T::default() };
        let tv = if t_has { t.x[b] } else { T::default() };
        if c_has {
            a += 1;
        }
        if t_has {
            b += 1;
        }

        let z = if accum_active {
            match (c_has, t_has) {
                (true, true) => Some(combine(cv, tv)),
                (true, false) => Some(cv),
                (false, true) => Some(tv),
                (false, false) => None,
            }
        } else if t_has {
            Some(tv)
        } else {
            None
        };

        if allow(i, &mut mc) {
            if let Some(z) = z {
                emit(i, z);
            }
        } else if c_has && !replace {
            emit(i, cv);
        }
    }
}
