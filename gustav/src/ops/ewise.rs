//! Element-wise add (set union) and multiply (set intersection).
//!
//! The sparse path builds a task list first: coarse tasks own runs of whole
//! vectors, balanced by entry count; a vector too big for one task is cut
//! into fine tasks with `slice_vector`, so the split points land on work,
//! not on row numbers. Every task then runs a count pass and a fill pass
//! over its share, writing disjoint windows of the output.
//!
//! When both operands are bitmap or full the result is built cell-wise as a
//! bitmap instead; no index arrays are ever materialized.

use std::marker::PhantomData;

#[cfg(feature = "parallel")]
use gustav_maybe_rayon::{IndexedParallelIterator, ParallelIterator};
use gustav_maybe_rayon::{MaybeParIter, MaybeParIterMut};
use gustav_ring::{BinaryOp, Scalar};
use gustav_util::{ceil_div_usize, cumsum, partition_offsets};

use crate::burble::burble_log;
use crate::context::Context;
use crate::error::{alloc_vec, Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Orientation, SparseRef, Store};
use crate::ops::descriptor::{Descriptor, InputOption};
use crate::ops::mask::accum_mask;
use crate::ops::{split_mut_by, Accumulator};
use crate::slice::slice_vector;

/// `C⟨M⟩ = accum(C, A ⊕ B)`: union pattern, `op` where both sides exist.
pub fn ewise_add<Op, Acc>(
    ctx: &Context,
    c: &mut Matrix<Op::Z>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<Op::Z>,
    b: &Matrix<Op::Z>,
    desc: &Descriptor,
) -> Result<()>
where
    Op: BinaryOp<X = <Op as BinaryOp>::Z, Y = <Op as BinaryOp>::Z>,
    Acc: Accumulator<Op::Z>,
{
    ewise::<AddKernel<Op>, Acc>(ctx, c, mask, a, b, desc)
}

/// `C⟨M⟩ = accum(C, A ⊗ B)`: intersection pattern, operand types free.
pub fn ewise_mult<Op, Acc>(
    ctx: &Context,
    c: &mut Matrix<Op::Z>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<Op::X>,
    b: &Matrix<Op::Y>,
    desc: &Descriptor,
) -> Result<()>
where
    Op: BinaryOp,
    Acc: Accumulator<Op::Z>,
{
    ewise::<MultKernel<Op>, Acc>(ctx, c, mask, a, b, desc)
}

fn ewise<K: EwiseKernel, Acc: Accumulator<K::C>>(
    ctx: &Context,
    c: &mut Matrix<K::C>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<K::A>,
    b: &Matrix<K::B>,
    desc: &Descriptor,
) -> Result<()> {
    let out = c.guarded(|c| {
        let a_t;
        let a_eff: &Matrix<K::A> = if desc.inp0 == InputOption::Transpose {
            a_t = a.transposed()?;
            &a_t
        } else {
            a
        };
        let b_t;
        let b_eff: &Matrix<K::B> = if desc.inp1 == InputOption::Transpose {
            b_t = b.transposed()?;
            &b_t
        } else {
            b
        };

        if (a_eff.nrows(), a_eff.ncols()) != (b_eff.nrows(), b_eff.ncols())
            || (a_eff.nrows(), a_eff.ncols()) != (c.nrows(), c.ncols())
        {
            return Err(Error::DimensionMismatch(format!(
                "ewise: {}x{} with {}x{} into {}x{}",
                a_eff.nrows(),
                a_eff.ncols(),
                b_eff.nrows(),
                b_eff.ncols(),
                c.nrows(),
                c.ncols()
            )));
        }

        let a_or = a_eff.reoriented(c.orientation())?;
        let b_or = b_eff.reoriented(c.orientation())?;

        let t = if is_dense_store(&a_or) && is_dense_store(&b_or) {
            burble_log!("ewise: bitmap kernel");
            ewise_bitmap::<K>(&a_or, &b_or, c.orientation())?
        } else {
            let a_s = a_or.as_sparse()?;
            let b_s = b_or.as_sparse()?;
            let (ar, br) = match (a_s.sparse_ref(), b_s.sparse_ref()) {
                (Some(ar), Some(br)) => (ar, br),
                _ => {
                    return Err(Error::InvariantViolation(
                        "ewise operands not clean".into(),
                    ))
                }
            };
            ewise_sparse::<K>(ctx, ar, br, c.nrows(), c.ncols(), c.orientation())?
        };

        accum_mask::<K::C, Acc>(ctx, c, t, mask, desc)
    });
    if out.is_ok() {
        c.conform()?;
    }
    out
}

fn is_dense_store<T: Scalar>(m: &Matrix<T>) -> bool {
    matches!(m.store, Store::Bitmap { .. } | Store::Full { .. })
}

/// Cell-parallel kernel over two dense operands.
fn ewise_bitmap<K: EwiseKernel>(
    a: &Matrix<K::A>,
    b: &Matrix<K::B>,
    orientation: Orientation,
) -> Result<Matrix<K::C>> {
    let (vlen, vdim) = (a.vlen(), a.vdim());
    let cells = vlen * vdim;
    let (ab, ax) = dense_view(a);
    let (bb, bx) = dense_view(b);

    let mut cb = alloc_vec(0u8, cells)?;
    let mut cx = alloc_vec(K::C::default(), cells)?;

    use gustav_maybe_rayon::MaybeParChunksMut;
    cb.par_chunks_mut(vlen)
        .zip(cx.par_chunks_mut(vlen))
        .enumerate()
        .for_each(|(vec, (bcol, xcol))| {
            let base = vec * vlen;
            for idx in 0..vlen {
                let off = base + idx;
                let av = match ab {
                    Some(ab) if ab[off] == 0 => None,
                    _ => Some(ax[off]),
                };
                let bv = match bb {
                    Some(bb) if bb[off] == 0 => None,
                    _ => Some(bx[off]),
                };
                if let Some(z) = K::dense_cell(av, bv) {
                    bcol[idx] = 1;
                    xcol[idx] = z;
                }
            }
        });

    let nvals = cb.iter().filter(|&&bit| bit != 0).count();
    Ok(Matrix::from_parts(
        a.nrows(),
        a.ncols(),
        orientation,
        Store::Bitmap {
            b: cb,
            x: cx,
            nvals,
        },
    ))
}

fn dense_view<T: Scalar>(m: &Matrix<T>) -> (Option<&[u8]>, &[T]) {
    match &m.store {
        Store::Bitmap { b, x, .. } => (Some(b), x),
        Store::Full { x } => (None, x),
        _ => unreachable!("dense view of sparse store"),
    }
}

/// One unit of element-wise work: either a run of whole vectors, or one
/// row-range piece of a single big vector.
struct Task {
    kfirst: usize,
    klast: usize,
    fine: Option<Fine>,
}

struct Fine {
    k: usize,
    pa: (usize, usize),
    pb: (usize, usize),
}

/// A candidate output vector with its operand ranges.
#[derive(Clone, Copy)]
struct Cand {
    j: i64,
    a: (usize, usize),
    b: (usize, usize),
}

fn ewise_sparse<K: EwiseKernel>(
    ctx: &Context,
    a: SparseRef<'_, K::A>,
    b: SparseRef<'_, K::B>,
    nrows: usize,
    ncols: usize,
    orientation: Orientation,
) -> Result<Matrix<K::C>> {
    let vlen = a.vlen as i64;
    let vdim = a.vdim;
    let hyper_out = a.h.is_some() || b.h.is_some();

    // Phase 0: the union of the operands' vector lists.
    let cands = candidates(&a, &b)?;
    let ncand = cands.len();

    // Static partition by per-vector work.
    let mut work = alloc_vec(0i64, ncand + 1)?;
    for (k, cand) in cands.iter().enumerate() {
        work[k] = ((cand.a.1 - cand.a.0) + (cand.b.1 - cand.b.0) + 1) as i64;
    }
    let total = cumsum(&mut work) as usize;
    let ntasks = ctx.ntasks(total);
    let target = ceil_div_usize(total, ntasks);
    let bounds = partition_offsets(&work, ntasks);

    let mut tasks: Vec<Task> = Vec::new();
    for win in bounds.windows(2) {
        let (k0, k1) = (win[0], win[1]);
        if k0 == k1 {
            continue;
        }
        let wk = (work[k1] - work[k0]) as usize;
        if k1 - k0 == 1 && ntasks > 1 && wk > 2 * target {
            fine_split(&cands[k0], k0, vlen, wk, target, a.i, b.i, &mut tasks);
        } else {
            tasks.push(Task {
                kfirst: k0,
                klast: k1,
                fine: None,
            });
        }
    }
    burble_log!(
        "ewise: {} tasks ({} coarse target {target}) over {ncand} vectors",
        tasks.len(),
        ntasks
    );

    // Count pass.
    let counts: Vec<Vec<i64>> = tasks
        .par_iter()
        .map(|task| match &task.fine {
            Some(fine) => {
                let n = K::count(
                    &a.i[fine.pa.0..fine.pa.1],
                    &b.i[fine.pb.0..fine.pb.1],
                );
                vec![n as i64]
            }
            None => (task.kfirst..task.klast)
                .map(|k| {
                    let cand = &cands[k];
                    K::count(&a.i[cand.a.0..cand.a.1], &b.i[cand.b.0..cand.b.1]) as i64
                })
                .collect(),
        })
        .collect();

    // Per-vector totals and per-task output offsets.
    let mut cp = alloc_vec(0i64, ncand + 1)?;
    let mut task_offsets = Vec::with_capacity(tasks.len() + 1);
    let mut running = 0usize;
    for (task, cnts) in tasks.iter().zip(&counts) {
        task_offsets.push(running);
        match &task.fine {
            Some(fine) => cp[fine.k] += cnts[0],
            None => {
                for (off, k) in (task.kfirst..task.klast).enumerate() {
                    cp[k] += cnts[off];
                }
            }
        }
        running += cnts.iter().sum::<i64>() as usize;
    }
    task_offsets.push(running);
    let cnz = cumsum(&mut cp) as usize;
    debug_assert_eq!(cnz, running);

    // Fill pass into disjoint windows.
    let mut ci = alloc_vec(0i64, cnz)?;
    let mut cx = alloc_vec(K::C::default(), cnz)?;
    let ci_parts = split_mut_by(&mut ci, &task_offsets);
    let cx_parts = split_mut_by(&mut cx, &task_offsets);
    let mut items: Vec<(usize, &mut [i64], &mut [K::C])> = ci_parts
        .into_iter()
        .zip(cx_parts)
        .enumerate()
        .map(|(t, (cis, cxs))| (t, cis, cxs))
        .collect();

    items.par_iter_mut().for_each(|(t, cis, cxs)| {
        let task = &tasks[*t];
        match &task.fine {
            Some(fine) => {
                K::fill(
                    &a.i[fine.pa.0..fine.pa.1],
                    &a.x[fine.pa.0..fine.pa.1],
                    &b.i[fine.pb.0..fine.pb.1],
                    &b.x[fine.pb.0..fine.pb.1],
                    cis,
                    cxs,
                );
            }
            None => {
                let mut pos = 0usize;
                for k in task.kfirst..task.klast {
                    let cand = &cands[k];
                    let n = counts[*t][k - task.kfirst] as usize;
                    K::fill(
                        &a.i[cand.a.0..cand.a.1],
                        &a.x[cand.a.0..cand.a.1],
                        &b.i[cand.b.0..cand.b.1],
                        &b.x[cand.b.0..cand.b.1],
                        &mut cis[pos..pos + n],
                        &mut cxs[pos..pos + n],
                    );
                    pos += n;
                }
            }
        }
    });

    // Assemble the store: dense vector table when both inputs had one,
    // hypersparse otherwise.
    let store = if hyper_out {
        let mut h = Vec::new();
        let mut p = vec![0i64];
        for (k, cand) in cands.iter().enumerate() {
            let n = cp[k + 1] - cp[k];
            if n > 0 {
                h.push(cand.j);
                p.push(p.last().copied().unwrap_or(0) + n);
            }
        }
        // ci/cx windows of empty vectors are empty; the arrays line up.
        Store::Hyper {
            h,
            p,
            i: ci,
            x: cx,
            pending: Pending::new(),
        }
    } else {
        debug_assert_eq!(ncand, vdim);
        Store::Sparse {
            p: cp,
            i: ci,
            x: cx,
            pending: Pending::new(),
        }
    };

    Ok(Matrix::from_parts(nrows, ncols, orientation, store))
}

fn candidates<A, B>(a: &SparseRef<'_, A>, b: &SparseRef<'_, B>) -> Result<Vec<Cand>> {
    let mut cands = Vec::new();
    match (a.h, b.h) {
        (None, None) => {
            for k in 0..a.vdim {
                cands.push(Cand {
                    j: k as i64,
                    a: a.range(k),
                    b: b.range(k),
                });
            }
        }
        _ => {
            let (mut ka, mut kb) = (0usize, 0usize);
            while ka < a.nvec() || kb < b.nvec() {
                let ja = if ka < a.nvec() { a.vec_id(ka) } else { i64::MAX };
                let jb = if kb < b.nvec() { b.vec_id(kb) } else { i64::MAX };
                let j = ja.min(jb);
                let arange = if ja == j {
                    let r = a.range(ka);
                    ka += 1;
                    r
                } else {
                    (0, 0)
                };
                let brange = if jb == j {
                    let r = b.range(kb);
                    kb += 1;
                    r
                } else {
                    (0, 0)
                };
                cands.push(Cand {
                    j,
                    a: arange,
                    b: brange,
                });
            }
        }
    }
    Ok(cands)
}

/// Cuts one oversized vector into work-balanced row ranges.
#[allow(clippy::too_many_arguments)]
fn fine_split(
    cand: &Cand,
    k: usize,
    vlen: i64,
    work: usize,
    target: usize,
    ai: &[i64],
    bi: &[i64],
    tasks: &mut Vec<Task>,
) {
    let nsub = ceil_div_usize(work, target).max(2);
    let mut cuts: Vec<(usize, usize)> = Vec::with_capacity(nsub - 1);
    for s in 1..nsub {
        let tail = work as f64 * s as f64 / nsub as f64;
        let r = slice_vector(
            None,
            0,
            0,
            ai,
            cand.a.0 as i64,
            cand.a.1 as i64,
            bi,
            cand.b.0 as i64,
            cand.b.1 as i64,
            vlen,
            tail,
        );
        let pa = if r.p_a < 0 { cand.a.0 } else { r.p_a as usize };
        let pb = if r.p_b < 0 { cand.b.0 } else { r.p_b as usize };
        cuts.push((pa, pb));
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut prev = (cand.a.0, cand.b.0);
    for &cut in &cuts {
        if cut > prev {
            tasks.push(Task {
                kfirst: k,
                klast: k + 1,
                fine: Some(Fine {
                    k,
                    pa: (prev.0, cut.0),
                    pb: (prev.1, cut.1),
                }),
            });
            prev = cut;
        }
    }
    let end = (cand.a.1, cand.b.1);
    if end > prev || prev == (cand.a.0, cand.b.0) {
        tasks.push(Task {
            kfirst: k,
            klast: k + 1,
            fine: Some(Fine {
                k,
                pa: (prev.0, end.0),
                pb: (prev.1, end.1),
            }),
        });
    }
}

/// The per-pattern kernels: count and fill over one pair of index runs.
trait EwiseKernel: 'static {
    type A: Scalar;
    type B: Scalar;
    type C: Scalar;

    fn count(ai: &[i64], bi: &[i64]) -> usize;
    fn fill(ai: &[i64], ax: &[Self::A], bi: &[i64], bx: &[Self::B], ci: &mut [i64], cx: &mut [Self::C]);
    fn dense_cell(a: Option<Self::A>, b: Option<Self::B>) -> Option<Self::C>;
}

struct AddKernel<Op>(PhantomData<Op>);

impl<Op> EwiseKernel for AddKernel<Op>
where
    Op: BinaryOp<X = <Op as BinaryOp>::Z, Y = <Op as BinaryOp>::Z>,
{
    type A = Op::Z;
    type B = Op::Z;
    type C = Op::Z;

    fn count(ai: &[i64], bi: &[i64]) -> usize {
        let (mut a, mut b, mut n) = (0usize, 0usize, 0usize);
        while a < ai.len() && b < bi.len() {
            match ai[a].cmp(&bi[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    a += 1;
                    b += 1;
                }
            }
            n += 1;
        }
        n + (ai.len() - a) + (bi.len() - b)
    }

    fn fill(ai: &[i64], ax: &[Op::Z], bi: &[i64], bx: &[Op::Z], ci: &mut [i64], cx: &mut [Op::Z]) {
        let (mut a, mut b, mut w) = (0usize, 0usize, 0usize);
        while a < ai.len() && b < bi.len() {
            match ai[a].cmp(&bi[b]) {
                std::cmp::Ordering::Less => {
                    ci[w] = ai[a];
                    cx[w] = ax[a];
                    a += 1;
                }
                std::cmp::Ordering::Greater => {
                    ci[w] = bi[b];
                    cx[w] = bx[b];
                    b += 1;
                }
                std::cmp::Ordering::Equal => {
                    ci[w] = ai[a];
                    cx[w] = Op::apply(ax[a], bx[b]);
                    a += 1;
                    b += 1;
                }
            }
            w += 1;
        }
        while a < ai.len() {
            ci[w] = ai[a];
            cx[w] = ax[a];
            a += 1;
            w += 1;
        }
        while b < bi.len() {
            ci[w] = bi[b];
            cx[w] = bx[b];
            b += 1;
            w += 1;
        }
        debug_assert_eq!(w, ci.len());
    }

    fn dense_cell(a: Option<Op::Z>, b: Option<Op::Z>) -> Option<Op::Z> {
        match (a, b) {
            (Some(x), Some(y)) => Some(Op::apply(x, y)),
            (Some(x), None) => Some(x),
            (None, Some(y)) => Some(y),
            (None, None) => None,
        }
    }
}

struct MultKernel<Op>(PhantomData<Op>);

impl<Op: BinaryOp> EwiseKernel for MultKernel<Op> {
    type A = Op::X;
    type B = Op::Y;
    type C = Op::Z;

    fn count(ai: &[i64], bi: &[i64]) -> usize {
        let (mut a, mut b, mut n) = (0usize, 0usize, 0usize);
        while a < ai.len() && b < bi.len() {
            match ai[a].cmp(&bi[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    n += 1;
                    a += 1;
                    b += 1;
                }
            }
        }
        n
    }

    fn fill(ai: &[i64], ax: &[Op::X], bi: &[i64], bx: &[Op::Y], ci: &mut [i64], cx: &mut [Op::Z]) {
        let (mut a, mut b, mut w) = (0usize, 0usize, 0usize);
        while a < ai.len() && b < bi.len() {
            match ai[a].cmp(&bi[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    ci[w] = ai[a];
                    cx[w] = Op::apply(ax[a], bx[b]);
                    w += 1;
                    a += 1;
                    b += 1;
                }
            }
        }
        debug_assert_eq!(w, ci.len());
    }

    fn dense_cell(a: Option<Op::X>, b: Option<Op::Y>) -> Option<Op::Z> {
        match (a, b) {
            (Some(x), Some(y)) => Some(Op::apply(x, y)),
            _ => None,
        }
    }
}
