//! Semiring matrix multiply `C⟨M⟩ = accum(C, A ⊕.⊗ B)` and its algorithm
//! families.
//!
//! The multiply itself always runs column-oriented: operands are brought to
//! `ByCol` (and explicitly transposed when the descriptor says so), one
//! family builds the unmasked product, and the masked write-back plus the
//! output's own conform finish the job.
//!
//! Family selection under `AxbMethod::Default`: a transposed first operand
//! goes to dot (which consumes `A'` in place), a diagonal operand goes to
//! the scale kernels, everything else to Gustavson. Hints are honored as
//! given.

mod dot;
mod gustavson;
mod heap;
mod scale;

use std::borrow::Cow;

use gustav_ring::semiring::{AddT, MultX, MultY, Semiring};
use gustav_ring::Scalar;

use crate::burble::burble_log;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Orientation, SparseRef, Store};
use crate::ops::descriptor::{AxbMethod, Descriptor, InputOption};
use crate::ops::mask::accum_mask;
use crate::ops::Accumulator;

pub fn mxm<S, Acc>(
    ctx: &Context,
    c: &mut Matrix<AddT<S>>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<MultX<S>>,
    b: &Matrix<MultY<S>>,
    desc: &Descriptor,
) -> Result<()>
where
    S: Semiring,
    Acc: Accumulator<AddT<S>>,
{
    let out = c.guarded(|c| {
        let (am, an) = effective_shape(a.nrows(), a.ncols(), desc.inp0);
        let (bm, bn) = effective_shape(b.nrows(), b.ncols(), desc.inp1);
        if an != bm || c.nrows() != am || c.ncols() != bn {
            return Err(Error::DimensionMismatch(format!(
                "mxm: {am}x{an} times {bm}x{bn} into {}x{}",
                c.nrows(),
                c.ncols()
            )));
        }

        // Second operand: materialize the transpose if asked, column order.
        let b_t;
        let b_eff: &Matrix<MultY<S>> = if desc.inp1 == InputOption::Transpose {
            b_t = b.transposed()?;
            &b_t
        } else {
            b
        };
        let b_or = b_eff.reoriented(Orientation::ByCol)?;
        let b_s = b_or.as_sparse()?;
        let b_ref = clean_ref(&b_s)?;

        let a_or = a.reoriented(Orientation::ByCol)?;
        let a_transposed = desc.inp0 == InputOption::Transpose;

        // Resolve the family before materializing anything else; dot wants
        // A' which, when INP0 is transposed, is the stored A itself.
        let method = match desc.axb_method {
            AxbMethod::Default => {
                let a_s_probe = a_or.as_sparse()?;
                let a_probe = clean_ref(&a_s_probe)?;
                if a_transposed {
                    AxbMethod::Dot
                } else if b.nrows() == b.ncols() && is_diagonal(&b_ref) {
                    burble_log!("mxm: colscale (B is diagonal)");
                    let a_s = a_or.as_sparse()?;
                    let t = finish(
                        scale::colscale::<S>(ctx, clean_ref(&a_s)?, b_ref)?,
                        clean_ref(&a_s)?,
                        am,
                        bn,
                    )?;
                    return write_back::<S, Acc>(ctx, c, t, mask, desc);
                } else if a.nrows() == a.ncols() && is_diagonal(&a_probe) {
                    burble_log!("mxm: rowscale (A is diagonal)");
                    let t = finish(
                        scale::rowscale::<S>(ctx, a_probe, b_ref)?,
                        b_ref,
                        am,
                        bn,
                    )?;
                    return write_back::<S, Acc>(ctx, c, t, mask, desc);
                } else {
                    AxbMethod::Gustavson
                }
            }
            hint => hint,
        };

        let t = match method {
            AxbMethod::Dot => {
                // The kernel wants C's row space as stored vectors.
                let w: Cow<'_, Matrix<MultX<S>>> = if a_transposed {
                    a_or
                } else {
                    Cow::Owned(a_or.transposed()?)
                };
                let w_s = w.as_sparse()?;
                burble_log!("mxm: dot");
                finish(dot::dot::<S>(ctx, clean_ref(&w_s)?, b_ref)?, b_ref, am, bn)?
            }
            AxbMethod::Gustavson | AxbMethod::Heap => {
                let w: Cow<'_, Matrix<MultX<S>>> = if a_transposed {
                    Cow::Owned(a_or.transposed()?)
                } else {
                    a_or
                };
                let w_s = w.as_sparse()?;
                let w_ref = clean_ref(&w_s)?;
                let parts = if method == AxbMethod::Heap {
                    burble_log!("mxm: heap");
                    heap::heap::<S>(ctx, w_ref, b_ref)?
                } else {
                    burble_log!("mxm: gustavson");
                    gustavson::gustavson::<S>(ctx, w_ref, b_ref)?
                };
                finish(parts, b_ref, am, bn)?
            }
            AxbMethod::Default => unreachable!("resolved above"),
        };

        write_back::<S, Acc>(ctx, c, t, mask, desc)
    });
    if out.is_ok() {
        c.conform()?;
    }
    out
}

fn write_back<S, Acc>(
    ctx: &Context,
    c: &mut Matrix<AddT<S>>,
    t: Matrix<AddT<S>>,
    mask: Option<&Matrix<bool>>,
    desc: &Descriptor,
) -> Result<()>
where
    S: Semiring,
    Acc: Accumulator<AddT<S>>,
{
    accum_mask::<AddT<S>, Acc>(ctx, c, t, mask, desc)
}

fn effective_shape(nrows: usize, ncols: usize, opt: InputOption) -> (usize, usize) {
    match opt {
        InputOption::Default => (nrows, ncols),
        InputOption::Transpose => (ncols, nrows),
    }
}

fn clean_ref<'a, T: Scalar>(m: &'a Cow<'a, Matrix<T>>) -> Result<SparseRef<'a, T>> {
    m.sparse_ref()
        .ok_or_else(|| Error::InvariantViolation("multiply operand not clean".into()))
}

/// Every stored entry sits on the main diagonal of its vector.
fn is_diagonal<T>(m: &SparseRef<'_, T>) -> bool {
    (0..m.nvec()).all(|k| {
        let (lo, hi) = m.range(k);
        hi - lo <= 1 && (lo..hi).all(|pos| m.i[pos] == m.vec_id(k))
    })
}

/// Wraps kernel output arrays in a matrix, following the driving operand's
/// vector table (dense offsets when it had none, a pruned table otherwise).
fn finish<Z: Scalar, D>(
    parts: (Vec<i64>, Vec<i64>, Vec<Z>),
    driving: SparseRef<'_, D>,
    nrows: usize,
    ncols: usize,
) -> Result<Matrix<Z>> {
    let (cp, ci, cx) = parts;
    let store = match driving.h {
        None => Store::Sparse {
            p: cp,
            i: ci,
            x: cx,
            pending: Pending::new(),
        },
        Some(h) => {
            let mut nh = Vec::new();
            let mut np = vec![0i64];
            for (k, &j) in h.iter().enumerate() {
                let n = cp[k + 1] - cp[k];
                if n > 0 {
                    nh.push(j);
                    np.push(np.last().copied().unwrap_or(0) + n);
                }
            }
            Store::Hyper {
                h: nh,
                p: np,
                i: ci,
                x: cx,
                pending: Pending::new(),
            }
        }
    };
    Ok(Matrix::from_parts(nrows, ncols, Orientation::ByCol, store))
}
