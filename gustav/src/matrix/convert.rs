//! Directed format conversions. Every public converter first finishes
//! deferred work, then either succeeds (the matrix is valid in the new
//! format) or fails with the matrix cleared to an empty but valid state.
//!
//! The hyper/sparse pair also exists in pending-preserving form for
//! `conform_hyper`, which moves between those two formats without forcing a
//! merge.

use std::mem;

use gustav_ring::Scalar;

use crate::burble::burble_log;
use crate::error::{alloc_vec, reserve, Error, Result};
use crate::matrix::pending::Pending;
use crate::matrix::{Matrix, Store};

/// `nnz >= bitmap_switch * vlen * vdim`: dense enough for a bitmap.
pub(crate) fn sparse_to_bitmap_test(bitmap_switch: f64, nnz: usize, vlen: usize, vdim: usize) -> bool {
    nnz as f64 >= bitmap_switch * (vlen as f64) * (vdim as f64)
}

/// `nnz < bitmap_switch * vlen * vdim`: sparse again, no hysteresis band.
pub(crate) fn bitmap_to_sparse_test(bitmap_switch: f64, nnz: usize, vlen: usize, vdim: usize) -> bool {
    (nnz as f64) < bitmap_switch * (vlen as f64) * (vdim as f64)
}

/// `nvec >= hyper_switch * vdim`: enough vectors to drop the table.
pub(crate) fn hyper_to_sparse_test(hyper_switch: f64, nvec: usize, vdim: usize) -> bool {
    nvec as f64 >= hyper_switch * (vdim as f64)
}

/// `nvec < hyper_switch * vdim`: few enough vectors to keep a table.
pub(crate) fn sparse_to_hyper_test(hyper_switch: f64, nvec: usize, vdim: usize) -> bool {
    (nvec as f64) < hyper_switch * (vdim as f64)
}

impl<T: Scalar> Matrix<T> {
    /// Converts any format to sparse, finishing deferred work first.
    pub fn to_sparse(&mut self) -> Result<()> {
        if matches!(self.store, Store::Sparse { .. }) {
            return Ok(());
        }
        self.guarded(|m| {
            m.wait()?;
            match m.format_tag() {
                Tag::Hyper => {
                    burble_log!("convert: hyper to sparse");
                    m.hyper_to_sparse_keep_pending()
                }
                Tag::Bitmap => {
                    burble_log!("convert: bitmap to sparse");
                    m.bitmap_to_sparse_inner()
                }
                Tag::Full => {
                    burble_log!("convert: full to sparse");
                    m.full_to_sparse_inner()
                }
                Tag::Sparse => Ok(()),
            }
        })
    }

    /// Converts any format to hypersparse, finishing deferred work first.
    pub fn to_hyper(&mut self) -> Result<()> {
        if matches!(self.store, Store::Hyper { .. }) {
            return Ok(());
        }
        self.guarded(|m| {
            m.wait()?;
            if matches!(m.store, Store::Bitmap { .. } | Store::Full { .. }) {
                match m.format_tag() {
                    Tag::Bitmap => m.bitmap_to_sparse_inner()?,
                    Tag::Full => m.full_to_sparse_inner()?,
                    _ => {}
                }
            }
            burble_log!("convert: sparse to hyper");
            m.sparse_to_hyper_keep_pending()
        })
    }

    /// Converts any format to bitmap, finishing deferred work first.
    pub fn to_bitmap(&mut self) -> Result<()> {
        if matches!(self.store, Store::Bitmap { .. }) {
            return Ok(());
        }
        self.guarded(|m| {
            m.wait()?;
            let (vlen, vdim) = (m.vlen(), m.vdim());
            let cells = vlen * vdim;
            match mem::replace(&mut m.store, Store::Full { x: Vec::new() }) {
                Store::Full { x } => {
                    burble_log!("convert: full to bitmap");
                    m.store = Store::Bitmap {
                        b: alloc_vec(1u8, cells)?,
                        x,
                        nvals: cells,
                    };
                }
                Store::Sparse { p, i, x, .. } => {
                    burble_log!("convert: sparse to bitmap");
                    m.store = scatter_to_bitmap(&p, &i, &x, None, vlen, cells)?;
                }
                Store::Hyper { h, p, i, x, .. } => {
                    burble_log!("convert: hyper to bitmap");
                    m.store = scatter_to_bitmap(&p, &i, &x, Some(&h), vlen, cells)?;
                }
                bitmap => m.store = bitmap,
            }
            Ok(())
        })
    }

    /// Converts to full. Every cell must be occupied once deferred work is
    /// finished.
    pub fn to_full(&mut self) -> Result<()> {
        if matches!(self.store, Store::Full { .. }) {
            return Ok(());
        }
        self.guarded(|m| {
            m.wait()?;
            let cells = m.vlen() * m.vdim();
            if m.nnz_live() != cells {
                return Err(Error::BadInput(format!(
                    "to_full: {} of {cells} entries present",
                    m.nnz_live()
                )));
            }
            burble_log!("convert: to full");
            match mem::replace(&mut m.store, Store::Full { x: Vec::new() }) {
                // All present and sorted: the value array already is the
                // dense column-major layout.
                Store::Sparse { x, .. } | Store::Hyper { x, .. } | Store::Bitmap { x, .. } => {
                    m.store = Store::Full { x };
                }
                full => m.store = full,
            }
            Ok(())
        })
    }

    /// Expands the vector table away, keeping all deferred work.
    pub(crate) fn hyper_to_sparse_keep_pending(&mut self) -> Result<()> {
        let vdim = self.vdim();
        match mem::replace(&mut self.store, Store::Full { x: Vec::new() }) {
            Store::Hyper {
                h, p, i, x, pending,
            } => {
                let mut np = alloc_vec(0i64, vdim + 1)?;
                for k in 0..h.len() {
                    np[h[k] as usize + 1] = p[k + 1] - p[k];
                }
                for k in 0..vdim {
                    np[k + 1] += np[k];
                }
                self.store = Store::Sparse { p: np, i, x, pending };
                Ok(())
            }
            other => {
                self.store = other;
                Ok(())
            }
        }
    }

    /// Builds a vector table over the non-empty vectors, keeping all
    /// deferred work.
    pub(crate) fn sparse_to_hyper_keep_pending(&mut self) -> Result<()> {
        match mem::replace(&mut self.store, Store::Full { x: Vec::new() }) {
            Store::Sparse { p, i, x, pending } => {
                let nvec = p.len() - 1;
                let nonempty = (0..nvec).filter(|&k| p[k] < p[k + 1]).count();
                let mut h = Vec::new();
                reserve(&mut h, nonempty)?;
                let mut np = Vec::new();
                reserve(&mut np, nonempty + 1)?;
                for k in 0..nvec {
                    if p[k] < p[k + 1] {
                        h.push(k as i64);
                        np.push(p[k]);
                    }
                }
                np.push(p[nvec]);
                self.store = Store::Hyper {
                    h,
                    p: np,
                    i,
                    x,
                    pending,
                };
                Ok(())
            }
            other => {
                self.store = other;
                Ok(())
            }
        }
    }

    fn bitmap_to_sparse_inner(&mut self) -> Result<()> {
        let (vlen, vdim) = (self.vlen(), self.vdim());
        match mem::replace(&mut self.store, Store::Full { x: Vec::new() }) {
            Store::Bitmap { b, x, nvals } => {
                let mut p = alloc_vec(0i64, vdim + 1)?;
                let mut i = Vec::new();
                reserve(&mut i, nvals)?;
                let mut nx = Vec::new();
                reserve(&mut nx, nvals)?;
                for vec in 0..vdim {
                    for idx in 0..vlen {
                        let off = vec * vlen + idx;
                        if b[off] != 0 {
                            i.push(idx as i64);
                            nx.push(x[off]);
                        }
                    }
                    p[vec + 1] = i.len() as i64;
                }
                self.store = Store::Sparse {
                    p,
                    i,
                    x: nx,
                    pending: Pending::new(),
                };
                Ok(())
            }
            other => {
                self.store = other;
                Ok(())
            }
        }
    }

    fn full_to_sparse_inner(&mut self) -> Result<()> {
        let (vlen, vdim) = (self.vlen(), self.vdim());
        match mem::replace(&mut self.store, Store::Full { x: Vec::new() }) {
            Store::Full { x } => {
                let mut p = alloc_vec(0i64, vdim + 1)?;
                let mut i = Vec::new();
                reserve(&mut i, vlen * vdim)?;
                for vec in 0..vdim {
                    i.extend((0..vlen).map(|idx| idx as i64));
                    p[vec + 1] = ((vec + 1) * vlen) as i64;
                }
                self.store = Store::Sparse {
                    p,
                    i,
                    x,
                    pending: Pending::new(),
                };
                Ok(())
            }
            other => {
                self.store = other;
                Ok(())
            }
        }
    }

    fn format_tag(&self) -> Tag {
        match self.store {
            Store::Hyper { .. } => Tag::Hyper,
            Store::Sparse { .. } => Tag::Sparse,
            Store::Bitmap { .. } => Tag::Bitmap,
            Store::Full { .. } => Tag::Full,
        }
    }

    /// Runs a conversion step; on failure the matrix is cleared to the
    /// empty-but-valid state and the error propagates.
    pub(crate) fn guarded(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        match f(self) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset_empty();
                Err(e)
            }
        }
    }
}

enum Tag {
    Hyper,
    Sparse,
    Bitmap,
    Full,
}

fn scatter_to_bitmap<T: Scalar>(
    p: &[i64],
    i: &[i64],
    x: &[T],
    h: Option<&[i64]>,
    vlen: usize,
    cells: usize,
) -> Result<Store<T>> {
    let mut b = alloc_vec(0u8, cells)?;
    let mut nx = alloc_vec(T::default(), cells)?;
    let nvec = p.len() - 1;
    let mut nvals = 0usize;
    for k in 0..nvec {
        let vec = match h {
            Some(h) => h[k] as usize,
            None => k,
        };
        for pos in p[k] as usize..p[k + 1] as usize {
            let off = vec * vlen + i[pos] as usize;
            b[off] = 1;
            nx[off] = x[pos];
            nvals += 1;
        }
    }
    Ok(Store::Bitmap { b, x: nx, nvals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Format, Orientation};

    fn sample() -> Matrix<i32> {
        let mut a = Matrix::<i32>::new(3, 3, Orientation::ByCol).unwrap();
        for (r, c, v) in [(0, 0, 1), (0, 2, 2), (1, 1, 3), (2, 0, 4), (2, 2, 5)] {
            a.set_element(r, c, v).unwrap();
        }
        a
    }

    fn tuples(a: &mut Matrix<i32>) -> Vec<(usize, usize, i32)> {
        let mut t = a.extract_tuples().unwrap();
        t.sort_by_key(|&(r, c, _)| (r, c));
        t
    }

    #[test]
    fn density_tests_are_strict_both_sides() {
        // nnz exactly at the threshold converts up, and does not convert
        // back: no oscillation.
        assert!(sparse_to_bitmap_test(0.5, 50, 10, 10));
        assert!(!bitmap_to_sparse_test(0.5, 50, 10, 10));
        assert!(bitmap_to_sparse_test(0.5, 49, 10, 10));
        assert!(hyper_to_sparse_test(0.5, 5, 10));
        assert!(!sparse_to_hyper_test(0.5, 5, 10));
        assert!(sparse_to_hyper_test(0.5, 4, 10));
    }

    #[test]
    fn round_trip_all_formats() {
        let mut a = sample();
        let reference = tuples(&mut a);

        a.to_hyper().unwrap();
        assert_eq!(a.format(), Format::Hyper);
        a.check_invariants().unwrap();
        assert_eq!(tuples(&mut a), reference);

        a.to_bitmap().unwrap();
        assert_eq!(a.format(), Format::Bitmap);
        a.check_invariants().unwrap();
        assert_eq!(tuples(&mut a), reference);

        a.to_sparse().unwrap();
        assert_eq!(a.format(), Format::Sparse);
        a.check_invariants().unwrap();
        assert_eq!(tuples(&mut a), reference);
    }

    #[test]
    fn hyper_then_sparse_is_clean() {
        // any_to_sparse(any_to_hyper(A)) leaves no deferred work behind.
        let mut a = sample();
        a.remove_element(0, 0).unwrap();
        a.to_hyper().unwrap();
        assert!(!a.has_pending_work());
        a.to_sparse().unwrap();
        assert!(!a.has_pending_work());
        assert_eq!(a.nvals().unwrap(), 4);
        a.check_invariants().unwrap();
    }

    #[test]
    fn to_full_requires_every_cell() {
        let mut a = sample();
        assert!(matches!(a.to_full(), Err(Error::BadInput(_))));
        // Failure cleared the matrix but left it valid.
        a.check_invariants().unwrap();
        assert_eq!(a.nvals().unwrap(), 0);

        let mut d = Matrix::<i32>::new(2, 2, Orientation::ByCol).unwrap();
        for r in 0..2 {
            for c in 0..2 {
                d.set_element(r, c, (r * 2 + c) as i32).unwrap();
            }
        }
        d.to_full().unwrap();
        assert_eq!(d.format(), Format::Full);
        assert_eq!(d.get_element(1, 0).unwrap(), Some(2));
    }

    #[test]
    fn full_to_sparse_enumerates_cells() {
        let mut d = Matrix::<i32>::new(2, 2, Orientation::ByCol).unwrap();
        for r in 0..2 {
            for c in 0..2 {
                d.set_element(r, c, 10 + (r * 2 + c) as i32).unwrap();
            }
        }
        d.to_full().unwrap();
        d.to_sparse().unwrap();
        assert_eq!(d.format(), Format::Sparse);
        assert_eq!(d.nvals().unwrap(), 4);
        d.check_invariants().unwrap();
    }

    #[test]
    fn hyper_keeps_only_nonempty_vectors() {
        let mut a = Matrix::<i32>::new(100, 100, Orientation::ByCol).unwrap();
        a.set_element(5, 7, 1).unwrap();
        a.set_element(90, 7, 2).unwrap();
        a.set_element(3, 64, 3).unwrap();
        a.to_hyper().unwrap();
        match &a.store {
            Store::Hyper { h, p, .. } => {
                assert_eq!(h, &vec![7, 64]);
                assert_eq!(p, &vec![0, 2, 3]);
            }
            _ => panic!("expected hyper"),
        }
    }
}
