//! Submatrix extraction `C⟨M⟩ = accum(C, A(rows, cols))`. Index lists must
//! be strictly ascending and in range; `None` selects everything along that
//! dimension.

use gustav_ring::Scalar;
use gustav_util::split_binary_search;

use crate::context::Context;
use crate::error::{alloc_vec, Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Orientation, Store};
use crate::ops::descriptor::{Descriptor, InputOption};
use crate::ops::mask::accum_mask;
use crate::ops::Accumulator;

#[allow(clippy::too_many_arguments)]
pub fn extract<T, Acc>(
    ctx: &Context,
    c: &mut Matrix<T>,
    mask: Option<&Matrix<bool>>,
    a: &Matrix<T>,
    rows: Option<&[usize]>,
    cols: Option<&[usize]>,
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

        validate_list(rows, a_eff.nrows(), "row")?;
        validate_list(cols, a_eff.ncols(), "column")?;
        let out_rows = rows.map_or(a_eff.nrows(), <[usize]>::len);
        let out_cols = cols.map_or(a_eff.ncols(), <[usize]>::len);
        if (c.nrows(), c.ncols()) != (out_rows, out_cols) {
            return Err(Error::DimensionMismatch(format!(
                "extract: {out_rows}x{out_cols} into {}x{}",
                c.nrows(),
                c.ncols()
            )));
        }

        // Selection in the operand's own storage terms.
        let (vec_sel, idx_sel) = match a_eff.orientation() {
            Orientation::ByCol => (cols, rows),
            Orientation::ByRow => (rows, cols),
        };

        let a_s = a_eff.as_sparse()?;
        let ar = a_s
            .sparse_ref()
            .ok_or_else(|| Error::InvariantViolation("extract operand not clean".into()))?;

        let out_vdim = vec_sel.map_or(ar.vdim, <[usize]>::len);
        let mut p = alloc_vec(0i64, out_vdim + 1)?;
        let mut i: Vec<i64> = Vec::new();
        let mut x: Vec<T> = Vec::new();

        for jj in 0..out_vdim {
            let j = vec_sel.map_or(jj as i64, |sel| sel[jj] as i64);
            if let Some(k) = ar.find(j) {
                let (lo, hi) = ar.range(k);
                match idx_sel {
                    None => {
                        i.extend_from_slice(&ar.i[lo..hi]);
                        x.extend_from_slice(&ar.x[lo..hi]);
                    }
                    Some(sel) => {
                        // Walk the shorter side: probe each selected index
                        // into the vector's sorted run.
                        let mut cursor = lo;
                        for (out_idx, &want) in sel.iter().enumerate() {
                            let (off, found) =
                                split_binary_search(want as i64, &ar.i[cursor..hi]);
                            cursor += off;
                            if found {
                                i.push(out_idx as i64);
                                x.push(ar.x[cursor]);
                            }
                        }
                    }
                }
            }
            p[jj + 1] = i.len() as i64;
        }

        let t = Matrix::from_parts(
            out_rows,
            out_cols,
            a_eff.orientation(),
            Store::Sparse {
                p,
                i,
                x,
                pending: Pending::new(),
            },
        );
        accum_mask::<T, Acc>(ctx, c, t, mask, desc)
    });
    if out.is_ok() {
        c.conform()?;
    }
    out
}

fn validate_list(list: Option<&[usize]>, bound: usize, what: &str) -> Result<()> {
    if let Some(sel) = list {
        if sel.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::BadInput(format!(
                "{what} selection must be strictly ascending"
            )));
        }
        if sel.last().is_some_and(|&last| last >= bound) {
            return Err(Error::BadInput(format!(
                "{what} selection exceeds dimension {bound}"
            )));
        }
    }
    Ok(())
}
