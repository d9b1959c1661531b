//! Whole-matrix masked assignment `C⟨M⟩ = accum(C, A)`: the write-back
//! machinery applied to an operand taken as-is. Subscripted assignment is
//! the binding layer's business; the core moves whole matrices.

use gustav_ring::Scalar;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::ops::descriptor::{Descriptor, InputOption};
use crate::ops::mask::accum_mask;
use crate::ops::Accumulator;

pub fn assign<T, Acc>(
    ctx: &Context,
    c: &mut Matrix<T>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<T>,
    desc: &Descriptor,
) -> Result<()>
where
    T: Scalar,
    Acc: Accumulator<T>,
{
    let out = c.guarded(|c| {
        let a_t;
        let a_eff: &Matrix<T> = if desc.inp0 == InputOption::Transpose {
            a_t = a.transposed()?;
            &a_t
        } else {
            a
        };
        if (a_eff.nrows(), a_eff.ncols()) != (c.nrows(), c.ncols()) {
            return Err(Error::DimensionMismatch(format!(
                "assign: {}x{} into {}x{}",
                a_eff.nrows(),
                a_eff.ncols(),
                c.nrows(),
                c.ncols()
            )));
        }
        let t = a_eff.cleaned()?.into_owned();
        accum_mask::<T, Acc>(ctx, c, t, mask, desc)
    });
    if out.is_ok() {
        c.conform()?;
    }
    out
}
