//! Bucket transpose of the stored vectors. One array pass counts, one
//! scatters; output vectors come out sorted because the input is walked in
//! vector-major order.
//!
//! The same storage swap backs two different operations: the logical
//! transpose (swap the shape, keep the orientation) and reorientation (keep
//! the shape, flip the orientation).

use std::borrow::Cow;

use gustav_ring::Scalar;

use crate::error::{alloc_vec, Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Orientation, Store};

impl<T: Scalar> Matrix<T> {
    /// Returns the transpose, stored in the same orientation as `self`.
    /// Deferred work on `self` is finished in a private copy if present.
    pub fn transposed(&self) -> Result<Matrix<T>> {
        let clean = self.cleaned()?;
        let store = storage_transpose(&clean)?;
        Ok(Matrix {
            nrows: clean.ncols(),
            ncols: clean.nrows(),
            orientation: clean.orientation(),
            store,
            sparsity_control: clean.sparsity_control(),
            hyper_switch: clean.hyper_switch(),
            bitmap_switch: clean.bitmap_switch(),
        })
    }

    /// The same logical matrix stored along the other dimension, cloning
    /// only when the orientation actually differs.
    pub(crate) fn reoriented(&self, want: Orientation) -> Result<Cow<'_, Self>> {
        if self.orientation() == want {
            return Ok(Cow::Borrowed(self));
        }
        let clean = self.cleaned()?;
        let store = storage_transpose(&clean)?;
        Ok(Cow::Owned(Matrix {
            nrows: clean.nrows(),
            ncols: clean.ncols(),
            orientation: want,
            store,
            sparsity_control: clean.sparsity_control(),
            hyper_switch: clean.hyper_switch(),
            bitmap_switch: clean.bitmap_switch(),
        }))
    }
}

/// Swaps the index and vector roles of clean storage. Sparse input yields
/// sparse output; bitmap yields bitmap; full stays full.
fn storage_transpose<T: Scalar>(m: &Matrix<T>) -> Result<Store<T>> {
    let (vlen_o, vdim_o) = (m.vlen(), m.vdim());
    let (vlen_n, vdim_n) = (vdim_o, vlen_o);
    match &m.store {
        Store::Full { x } => {
            let mut nx = alloc_vec(T::default(), x.len())?;
            for vec in 0..vdim_o {
                for idx in 0..vlen_o {
                    nx[idx * vlen_n + vec] = x[vec * vlen_o + idx];
                }
            }
            Ok(Store::Full { x: nx })
        }
        Store::Bitmap { b, x, nvals } => {
            let mut nb = alloc_vec(0u8, b.len())?;
            let mut nx = alloc_vec(T::default(), x.len())?;
            for vec in 0..vdim_o {
                for idx in 0..vlen_o {
                    let off = vec * vlen_o + idx;
                    if b[off] != 0 {
                        let noff = idx * vlen_n + vec;
                        nb[noff] = 1;
                        nx[noff] = x[off];
                    }
                }
            }
            Ok(Store::Bitmap {
                b: nb,
                x: nx,
                nvals: *nvals,
            })
        }
        Store::Sparse { .. } | Store::Hyper { .. } => {
            let Some(a) = m.sparse_ref() else {
                return Err(Error::InvariantViolation(
                    "transpose input carries deferred work".into(),
                ));
            };
            let nz = a.i.len();
            let mut np = alloc_vec(0i64, vdim_n + 1)?;
            for &idx in a.i {
                np[idx as usize + 1] += 1;
            }
            for k in 0..vdim_n {
                np[k + 1] += np[k];
            }
            let mut cursor = np.clone();
            let mut ni = alloc_vec(0i64, nz)?;
            let mut nx = alloc_vec(T::default(), nz)?;
            for k in 0..a.nvec() {
                let j = a.vec_id(k);
                let (lo, hi) = a.range(k);
                for pos in lo..hi {
                    let dst = cursor[a.i[pos] as usize] as usize;
                    ni[dst] = j;
                    nx[dst] = a.x[pos];
                    cursor[a.i[pos] as usize] += 1;
                }
            }
            Ok(Store::Sparse {
                p: np,
                i: ni,
                x: nx,
                pending: Pending::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Format;

    fn sorted(mut t: Vec<(usize, usize, i32)>) -> Vec<(usize, usize, i32)> {
        t.sort_by_key(|&(r, c, _)| (r, c));
        t
    }

    #[test]
    fn transpose_rectangular() {
        let mut a = Matrix::<i32>::new(2, 3, Orientation::ByCol).unwrap();
        for (r, c, v) in [(0, 0, 1), (0, 2, 2), (1, 1, 3)] {
            a.set_element(r, c, v).unwrap();
        }
        let mut t = a.transposed().unwrap();
        assert_eq!((t.nrows(), t.ncols()), (3, 2));
        assert_eq!(
            sorted(t.extract_tuples().unwrap()),
            vec![(0, 0, 1), (1, 1, 3), (2, 0, 2)]
        );
        t.check_invariants().unwrap();
    }

    #[test]
    fn transpose_twice_is_identity() {
        let mut a = Matrix::<i32>::new(5, 4, Orientation::ByCol).unwrap();
        for k in 0..4 {
            a.set_element(k + 1, k, k as i32).unwrap();
        }
        let tt = a.transposed().unwrap().transposed().unwrap();
        let mut tt = tt;
        assert_eq!(
            sorted(tt.extract_tuples().unwrap()),
            sorted(a.extract_tuples().unwrap())
        );
    }

    #[test]
    fn transpose_full_stays_full() {
        let mut a = Matrix::<i32>::new(2, 2, Orientation::ByCol).unwrap();
        for r in 0..2 {
            for c in 0..2 {
                a.set_element(r, c, (1 + r * 2 + c) as i32).unwrap();
            }
        }
        a.wait().unwrap();
        a.to_full().unwrap();
        let mut t = a.transposed().unwrap();
        assert_eq!(t.format(), Format::Full);
        assert_eq!(t.get_element(0, 1).unwrap(), Some(3));
        assert_eq!(t.get_element(1, 0).unwrap(), Some(2));
    }

    #[test]
    fn reorient_preserves_logical_content() {
        let mut a = Matrix::<i32>::new(3, 4, Orientation::ByCol).unwrap();
        for (r, c, v) in [(0, 3, 7), (2, 1, 8), (1, 1, 9)] {
            a.set_element(r, c, v).unwrap();
        }
        let r = a.reoriented(Orientation::ByRow).unwrap().into_owned();
        assert_eq!(r.orientation(), Orientation::ByRow);
        assert_eq!((r.nrows(), r.ncols()), (3, 4));
        let mut r = r;
        assert_eq!(
            sorted(r.extract_tuples().unwrap()),
            sorted(a.extract_tuples().unwrap())
        );
    }
}
