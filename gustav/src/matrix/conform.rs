//! The policy engine: move a matrix into one of the formats its
//! `sparsity_control` allows, using the density switches to pick among them.

use gustav_ring::Scalar;

use crate::burble::burble_log;
use crate::error::{Error, Result};
use crate::matrix::convert::{
    bitmap_to_sparse_test, hyper_to_sparse_test, sparse_to_bitmap_test, sparse_to_hyper_test,
};
use crate::matrix::{Format, Matrix, Sparsity, Store};

impl<T: Scalar> Matrix<T> {
    /// Moves between hypersparse and sparse only, per `hyper_switch`.
    /// Bitmap and full matrices are left alone. Deferred work is preserved.
    ///
    /// The sparse-to-hyper side uses strict `<`, so a matrix on the
    /// boundary converts to sparse once and then stays put.
    pub fn conform_hyper(&mut self) -> Result<()> {
        let vdim = self.vdim();
        let hyper_switch = self.hyper_switch();
        match &self.store {
            Store::Hyper { h, .. } if hyper_to_sparse_test(hyper_switch, h.len(), vdim) => {
                burble_log!("conform_hyper: to sparse ({} of {vdim} vectors)", h.len());
                self.guarded(Self::hyper_to_sparse_keep_pending)
            }
            Store::Sparse { p, .. } => {
                let nonempty = (0..vdim).filter(|&k| p[k] < p[k + 1]).count();
                if sparse_to_hyper_test(hyper_switch, nonempty, vdim) {
                    burble_log!("conform_hyper: to hyper ({nonempty} of {vdim} vectors)");
                    self.guarded(Self::sparse_to_hyper_keep_pending)
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Moves the matrix into a format its `sparsity_control` allows,
    /// preserving the live entries. An empty control set is a caller error.
    pub fn conform(&mut self) -> Result<()> {
        let ctl = self.sparsity_control();
        if ctl.is_empty() {
            return Err(Error::BadInput("sparsity control allows no format".into()));
        }

        let format = self.format();
        let is_hyper = format == Format::Hyper;
        let is_sparse = format == Format::Sparse;
        let is_bitmap = format == Format::Bitmap;
        let is_full = format == Format::Full;

        // Already full, or every cell live with nothing deferred.
        let all_cells_live = is_full
            || (self.nnz_live() == self.vlen() * self.vdim() && !self.has_pending_work());

        burble_log!(
            "conform: {format:?} under {ctl:?}, all_cells_live={all_cells_live}"
        );

        const H: u32 = Sparsity::HYPER.bits();
        const S: u32 = Sparsity::SPARSE.bits();
        const B: u32 = Sparsity::BITMAP.bits();
        const F: u32 = Sparsity::FULL.bits();

        match ctl.bits() {
            // (1) always hypersparse
            x if x == H => self.to_hyper(),

            // (2) always sparse
            x if x == S => self.to_sparse(),

            // (3) sparse or hypersparse
            x if x == H | S => {
                if is_full || is_bitmap {
                    self.to_sparse()?;
                }
                self.conform_hyper()
            }

            // (4) always bitmap
            x if x == B => self.to_bitmap(),

            // (5) hypersparse or bitmap
            x if x == H | B => self.hyper_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full),

            // (6) sparse or bitmap
            x if x == S | B => self.sparse_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full),

            // (7) hypersparse, sparse, or bitmap
            x if x == H | S | B => {
                self.hyper_sparse_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full)
            }

            // (8), (12) full or (bitmap and full): full when dense, else
            // bitmap (even under {F} alone; a matrix with holes has no
            // other representation)
            x if x == F || x == B | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.to_bitmap()
                }
            }

            // (9) hypersparse or full
            x if x == H | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.to_hyper()
                }
            }

            // (10) sparse or full
            x if x == S | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.to_sparse()
                }
            }

            // (11) hypersparse, sparse, or full
            x if x == H | S | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    if is_bitmap {
                        self.to_sparse()?;
                    }
                    self.conform_hyper()
                }
            }

            // (13) hypersparse, bitmap, or full
            x if x == H | B | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.hyper_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full)
                }
            }

            // (14) sparse, bitmap, or full
            x if x == S | B | F => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.sparse_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full)
                }
            }

            // (15) anything goes
            _ => {
                if all_cells_live {
                    self.to_full()
                } else {
                    self.hyper_sparse_or_bitmap(is_hyper, is_sparse, is_bitmap, is_full)
                }
            }
        }
    }

    /// Ends in hypersparse or bitmap.
    fn hyper_or_bitmap(
        &mut self,
        is_hyper: bool,
        is_sparse: bool,
        is_bitmap: bool,
        is_full: bool,
    ) -> Result<()> {
        let (nnz, vlen, vdim) = (self.nnz_live(), self.vlen(), self.vdim());
        let bs = self.bitmap_switch();
        if is_full || ((is_hyper || is_sparse) && sparse_to_bitmap_test(bs, nnz, vlen, vdim)) {
            self.to_bitmap()
        } else if is_sparse || (is_bitmap && bitmap_to_sparse_test(bs, nnz, vlen, vdim)) {
            self.to_hyper()
        } else {
            Ok(())
        }
    }

    /// Ends in sparse or bitmap.
    fn sparse_or_bitmap(
        &mut self,
        is_hyper: bool,
        is_sparse: bool,
        is_bitmap: bool,
        is_full: bool,
    ) -> Result<()> {
        let (nnz, vlen, vdim) = (self.nnz_live(), self.vlen(), self.vdim());
        let bs = self.bitmap_switch();
        if is_full || ((is_hyper || is_sparse) && sparse_to_bitmap_test(bs, nnz, vlen, vdim)) {
            self.to_bitmap()
        } else if is_hyper || (is_bitmap && bitmap_to_sparse_test(bs, nnz, vlen, vdim)) {
            self.to_sparse()
        } else {
            Ok(())
        }
    }

    /// Ends in hypersparse, sparse, or bitmap.
    fn hyper_sparse_or_bitmap(
        &mut self,
        is_hyper: bool,
        is_sparse: bool,
        is_bitmap: bool,
        is_full: bool,
    ) -> Result<()> {
        let (nnz, vlen, vdim) = (self.nnz_live(), self.vlen(), self.vdim());
        let bs = self.bitmap_switch();
        if is_full || ((is_hyper || is_sparse) && sparse_to_bitmap_test(bs, nnz, vlen, vdim)) {
            self.to_bitmap()
        } else if is_bitmap {
            if bitmap_to_sparse_test(bs, nnz, vlen, vdim) {
                self.to_sparse()?;
                self.conform_hyper()
            } else {
                Ok(())
            }
        } else {
            self.conform_hyper()
        }
    }
}
