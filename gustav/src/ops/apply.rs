//! `C⟨M⟩ = accum(C, f(A))`: map a unary operator over every live entry.
//! The pattern is untouched, so the result reuses the operand's structure
//! verbatim, whatever its format.

use gustav_ring::UnaryOp;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Store};
use crate::ops::descriptor::{Descriptor, InputOption};
use crate::ops::mask::accum_mask;
use crate::ops::Accumulator;

pub fn apply<U, Acc>(
    ctx: &Context,
    c: &mut Matrix<U::Z>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<U::X>,
    desc: &Descriptor,
) -> Result<()>
where
    U: UnaryOp,
    Acc: Accumulator<U::Z>,
{
    let out = c.guarded(|c| {
        let a_t;
        let a_eff: &Matrix<U::X> = if desc.inp0 == InputOption::Transpose {
            a_t = a.transposed()?;
            &a_t
        } else {
            a
        };
        if (a_eff.nrows(), a_eff.ncols()) != (c.nrows(), c.ncols()) {
            return Err(Error::DimensionMismatch(format!(
                "apply: {}x{} into {}x{}",
                a_eff.nrows(),
                a_eff.ncols(),
                c.nrows(),
                c.ncols()
            )));
        }
        let clean = a_eff.cleaned()?;
        let t = map_entries::<U>(&clean)?;
        accum_mask::<U::Z, Acc>(ctx, c, t, mask, desc)
    });
    if out.is_ok() {
        c.conform()?;
    }
    out
}

/// Pattern-preserving value map.
fn map_entries<U: UnaryOp>(a: &Matrix<U::X>) -> Result<Matrix<U::Z>> {
    let mapped = |x: &[U::X]| -> Vec<U::Z> { x.iter().map(|&v| U::apply(v)).collect() };
    let store = match &a.store {
        Store::Full { x } => Store::Full { x: mapped(x) },
        Store::Bitmap { b, x, nvals } => Store::Bitmap {
            b: b.clone(),
            x: mapped(x),
            nvals: *nvals,
        },
        Store::Sparse { p, i, x, pending } => {
            debug_assert!(pending.is_clean());
            Store::Sparse {
                p: p.clone(),
                i: i.clone(),
                x: mapped(x),
                pending: Pending::new(),
            }
        }
        Store::Hyper {
            h, p, i, x, pending,
        } => {
            debug_assert!(pending.is_clean());
            Store::Hyper {
                h: h.clone(),
                p: p.clone(),
                i: i.clone(),
                x: mapped(x),
                pending: Pending::new(),
            }
        }
    };
    Ok(Matrix::from_parts(
        a.nrows(),
        a.ncols(),
        a.orientation(),
        store,
    ))
}
