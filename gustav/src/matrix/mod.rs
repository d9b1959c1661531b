pub(crate) mod conform;
pub(crate) mod convert;
pub(crate) mod pending;
pub(crate) mod transpose;
pub(crate) mod wait;

use std::borrow::Cow;
use std::str::FromStr;

use bitflags::bitflags;
use gustav_ring::binop::Second;
use gustav_ring::{BinaryOp, Scalar};
use serde::{Deserialize, Serialize};

use crate::error::{alloc_vec, Error, Result};
use crate::matrix::pending::{is_zombie, unflip, Pending};

/// Which way the stored vectors run. A `ByCol` matrix stores columns; a
/// `ByRow` matrix stores rows. All internal algorithms are written against
/// vectors and never mention rows or columns again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    ByRow,
    ByCol,
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "by row" => Ok(Orientation::ByRow),
            "by col" => Ok(Orientation::ByCol),
            _ => Err(Error::BadInput(format!("unknown format: {s:?}"))),
        }
    }
}

/// The four storage formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Hyper,
    Sparse,
    Bitmap,
    Full,
}

bitflags! {
    /// Per-matrix policy: the set of formats `conform` may choose from.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Sparsity: u32 {
        const HYPER = 1;
        const SPARSE = 2;
        const BITMAP = 4;
        const FULL = 8;
    }
}

impl Sparsity {
    /// Let the engine pick freely among all four formats.
    pub const AUTO: Sparsity = Sparsity::all();
}

impl Default for Sparsity {
    fn default() -> Self {
        Sparsity::AUTO
    }
}

/// Fraction of `vdim` below which the vector table goes hypersparse.
pub const DEFAULT_HYPER_SWITCH: f64 = 0.0625;
/// Fraction of `vlen * vdim` at which a sparse matrix goes bitmap.
pub const DEFAULT_BITMAP_SWITCH: f64 = 0.04;

/// Storage for one matrix. Exactly one variant is live at a time; only the
/// sparse variants carry deferred work.
#[derive(Clone, Debug)]
pub(crate) enum Store<T> {
    Hyper {
        h: Vec<i64>,
        p: Vec<i64>,
        i: Vec<i64>,
        x: Vec<T>,
        pending: Pending<T>,
    },
    Sparse {
        p: Vec<i64>,
        i: Vec<i64>,
        x: Vec<T>,
        pending: Pending<T>,
    },
    Bitmap {
        b: Vec<u8>,
        x: Vec<T>,
        nvals: usize,
    },
    Full {
        x: Vec<T>,
    },
}

/// A two-dimensional sparse value over a scalar type.
#[derive(Clone, Debug)]
pub struct Matrix<T: Scalar> {
    nrows: usize,
    ncols: usize,
    orientation: Orientation,
    pub(crate) store: Store<T>,
    sparsity_control: Sparsity,
    hyper_switch: f64,
    bitmap_switch: f64,
}

impl<T: Scalar> Matrix<T> {
    pub fn new(nrows: usize, ncols: usize, orientation: Orientation) -> Result<Self> {
        let vdim = match orientation {
            Orientation::ByCol => ncols,
            Orientation::ByRow => nrows,
        };
        Ok(Self {
            nrows,
            ncols,
            orientation,
            store: Store::Sparse {
                p: alloc_vec(0, vdim + 1)?,
                i: Vec::new(),
                x: Vec::new(),
                pending: Pending::new(),
            },
            sparsity_control: Sparsity::AUTO,
            hyper_switch: DEFAULT_HYPER_SWITCH,
            bitmap_switch: DEFAULT_BITMAP_SWITCH,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Length of each stored vector.
    pub fn vlen(&self) -> usize {
        match self.orientation {
            Orientation::ByCol => self.nrows,
            Orientation::ByRow => self.ncols,
        }
    }

    /// Number of addressable vectors.
    pub fn vdim(&self) -> usize {
        match self.orientation {
            Orientation::ByCol => self.ncols,
            Orientation::ByRow => self.nrows,
        }
    }

    pub fn format(&self) -> Format {
        match &self.store {
            Store::Hyper { .. } => Format::Hyper,
            Store::Sparse { .. } => Format::Sparse,
            Store::Bitmap { .. } => Format::Bitmap,
            Store::Full { .. } => Format::Full,
        }
    }

    pub fn sparsity_control(&self) -> Sparsity {
        self.sparsity_control
    }

    pub fn set_sparsity_control(&mut self, control: Sparsity) {
        self.sparsity_control = control;
    }

    pub fn hyper_switch(&self) -> f64 {
        self.hyper_switch
    }

    pub fn set_hyper_switch(&mut self, r: f64) -> Result<()> {
        if !(r > 0.0 && r <= 1.0) {
            return Err(Error::BadInput(format!("hyper_switch {r} not in (0, 1]")));
        }
        self.hyper_switch = r;
        Ok(())
    }

    pub fn bitmap_switch(&self) -> f64 {
        self.bitmap_switch
    }

    pub fn set_bitmap_switch(&mut self, r: f64) -> Result<()> {
        if !(r > 0.0 && r <= 1.0) {
            return Err(Error::BadInput(format!("bitmap_switch {r} not in (0, 1]")));
        }
        self.bitmap_switch = r;
        Ok(())
    }

    /// Maps a logical `(row, col)` to internal `(index, vector)` coordinates.
    #[inline]
    pub(crate) fn to_internal(&self, row: usize, col: usize) -> (i64, i64) {
        match self.orientation {
            Orientation::ByCol => (row as i64, col as i64),
            Orientation::ByRow => (col as i64, row as i64),
        }
    }

    #[inline]
    pub(crate) fn to_logical(&self, idx: i64, vec: i64) -> (usize, usize) {
        match self.orientation {
            Orientation::ByCol => (idx as usize, vec as usize),
            Orientation::ByRow => (vec as usize, idx as usize),
        }
    }

    /// Stored entries, zombies included, pending tuples excluded.
    pub(crate) fn nnz_stored(&self) -> usize {
        match &self.store {
            Store::Hyper { p, .. } => *p.last().unwrap_or(&0) as usize,
            Store::Sparse { p, .. } => *p.last().unwrap_or(&0) as usize,
            Store::Bitmap { nvals, .. } => *nvals,
            Store::Full { .. } => self.vlen() * self.vdim(),
        }
    }

    /// Live entries: stored minus zombies. Pending tuples are not counted.
    pub(crate) fn nnz_live(&self) -> usize {
        match &self.store {
            Store::Hyper { pending, .. } | Store::Sparse { pending, .. } => {
                self.nnz_stored() - pending.nzombies
            }
            _ => self.nnz_stored(),
        }
    }

    /// True when deferred work exists (always false for bitmap and full).
    pub fn has_pending_work(&self) -> bool {
        match &self.store {
            Store::Hyper { pending, .. } | Store::Sparse { pending, .. } => !pending.is_clean(),
            _ => false,
        }
    }

    /// Number of live entries; finishes deferred work first.
    pub fn nvals(&mut self) -> Result<usize> {
        self.wait()?;
        Ok(self.nnz_live())
    }

    /// Discards all entries, leaving an empty sparse matrix. Policy fields
    /// are untouched.
    pub fn clear(&mut self) -> Result<()> {
        self.store = Store::Sparse {
            p: alloc_vec(0, self.vdim() + 1)?,
            i: Vec::new(),
            x: Vec::new(),
            pending: Pending::new(),
        };
        Ok(())
    }

    /// Assembles a matrix around storage built by a kernel. Policy fields
    /// take their defaults; results are conformed under the output's own
    /// policy afterwards.
    pub(crate) fn from_parts(
        nrows: usize,
        ncols: usize,
        orientation: Orientation,
        store: Store<T>,
    ) -> Self {
        Self {
            nrows,
            ncols,
            orientation,
            store,
            sparsity_control: Sparsity::AUTO,
            hyper_switch: DEFAULT_HYPER_SWITCH,
            bitmap_switch: DEFAULT_BITMAP_SWITCH,
        }
    }

    /// The empty-but-valid state used after a failed conversion or kernel:
    /// hypersparse with no vectors, no allocation needed.
    pub(crate) fn reset_empty(&mut self) {
        self.store = Store::Hyper {
            h: Vec::new(),
            p: vec![0],
            i: Vec::new(),
            x: Vec::new(),
            pending: Pending::new(),
        };
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows || col >= self.ncols {
            return Err(Error::BadInput(format!(
                "index ({row}, {col}) out of range for {}x{} matrix",
                self.nrows, self.ncols
            )));
        }
        Ok(())
    }

    /// Sets `A(row, col) = val`. Appends to the pending tuple buffer unless
    /// the target cell can be updated in place.
    pub fn set_element(&mut self, row: usize, col: usize, val: T) -> Result<()> {
        self.check_bounds(row, col)?;
        let (idx, vec) = self.to_internal(row, col);
        let vlen = self.vlen();
        match &mut self.store {
            Store::Full { x } => {
                x[vec as usize * vlen + idx as usize] = val;
            }
            Store::Bitmap { b, x, nvals } => {
                let off = vec as usize * vlen + idx as usize;
                if b[off] == 0 {
                    b[off] = 1;
                    *nvals += 1;
                }
                x[off] = val;
            }
            Store::Sparse { p, i, x, pending } => {
                if !pending.jumbled {
                    let (lo, hi) = (p[vec as usize] as usize, p[vec as usize + 1] as usize);
                    if let Some(pos) = search_unflipped(&i[lo..hi], idx) {
                        let pos = lo + pos;
                        if is_zombie(i[pos]) {
                            i[pos] = idx;
                            pending.nzombies -= 1;
                        }
                        x[pos] = val;
                        return Ok(());
                    }
                }
                pending.push(idx, vec, val);
            }
            Store::Hyper {
                h, p, i, x, pending, ..
            } => {
                if !pending.jumbled {
                    if let Ok(k) = h.binary_search(&vec) {
                        let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
                        if let Some(pos) = search_unflipped(&i[lo..hi], idx) {
                            let pos = lo + pos;
                            if is_zombie(i[pos]) {
                                i[pos] = idx;
                                pending.nzombies -= 1;
                            }
                            x[pos] = val;
                            return Ok(());
                        }
                    }
                }
                pending.push(idx, vec, val);
            }
        }
        Ok(())
    }

    /// Reads `A(row, col)`, finishing deferred work first.
    pub fn get_element(&mut self, row: usize, col: usize) -> Result<Option<T>> {
        self.check_bounds(row, col)?;
        self.wait()?;
        let (idx, vec) = self.to_internal(row, col);
        let vlen = self.vlen();
        Ok(match &self.store {
            Store::Full { x } => Some(x[vec as usize * vlen + idx as usize]),
            Store::Bitmap { b, x, .. } => {
                let off = vec as usize * vlen + idx as usize;
                (b[off] != 0).then(|| x[off])
            }
            Store::Sparse { p, i, x, .. } => {
                let (lo, hi) = (p[vec as usize] as usize, p[vec as usize + 1] as usize);
                search_unflipped(&i[lo..hi], idx).map(|pos| x[lo + pos])
            }
            Store::Hyper { h, p, i, x, .. } => h.binary_search(&vec).ok().and_then(|k| {
                let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
                search_unflipped(&i[lo..hi], idx).map(|pos| x[lo + pos])
            }),
        })
    }

    /// Deletes `A(row, col)` if present. In the sparse formats the entry
    /// becomes a zombie, reclaimed on the next `wait`.
    pub fn remove_element(&mut self, row: usize, col: usize) -> Result<()> {
        self.check_bounds(row, col)?;
        if matches!(self.store, Store::Full { .. }) {
            // A full matrix cannot represent a hole.
            self.to_bitmap()?;
        }
        // An in-place search needs sorted vectors and no competing pending
        // tuple for the same cell.
        if self.has_pending_work_tuples_or_jumble() {
            self.wait()?;
        }
        let (idx, vec) = self.to_internal(row, col);
        let vlen = self.vlen();
        match &mut self.store {
            Store::Full { .. } => {}
            Store::Bitmap { b, nvals, .. } => {
                let off = vec as usize * vlen + idx as usize;
                if b[off] != 0 {
                    b[off] = 0;
                    *nvals -= 1;
                }
            }
            Store::Sparse { p, i, pending, .. } => {
                let (lo, hi) = (p[vec as usize] as usize, p[vec as usize + 1] as usize);
                if let Some(pos) = search_unflipped(&i[lo..hi], idx) {
                    let pos = lo + pos;
                    if !is_zombie(i[pos]) {
                        i[pos] = pending::flip(i[pos]);
                        pending.nzombies += 1;
                    }
                }
            }
            Store::Hyper {
                h, p, i, pending, ..
            } => {
                if let Ok(k) = h.binary_search(&vec) {
                    let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
                    if let Some(pos) = search_unflipped(&i[lo..hi], idx) {
                        let pos = lo + pos;
                        if !is_zombie(i[pos]) {
                            i[pos] = pending::flip(i[pos]);
                            pending.nzombies += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn has_pending_work_tuples_or_jumble(&self) -> bool {
        match &self.store {
            Store::Hyper { pending, .. } | Store::Sparse { pending, .. } => {
                pending.jumbled || pending.ntuples() > 0
            }
            _ => false,
        }
    }

    /// Bulk construction from tuples, coalescing duplicates with `D`.
    /// The matrix must hold no entries.
    pub fn build<D>(&mut self, tuples: &[(usize, usize, T)]) -> Result<()>
    where
        D: BinaryOp<X = T, Y = T, Z = T>,
    {
        if self.nnz_stored() > 0 || self.has_pending_work() {
            return Err(Error::BadInput("build: output is not empty".into()));
        }
        // An empty bitmap or full still needs index arrays to append to.
        self.clear()?;
        for &(row, col, val) in tuples {
            self.check_bounds(row, col)?;
            let (idx, vec) = self.to_internal(row, col);
            match &mut self.store {
                Store::Hyper { pending, .. } | Store::Sparse { pending, .. } => {
                    pending.push(idx, vec, val)
                }
                Store::Bitmap { .. } | Store::Full { .. } => {}
            }
        }
        self.wait_with::<D>()
    }

    /// Finishes deferred work and returns every live entry as
    /// `(row, col, value)`, grouped by stored vector.
    pub fn extract_tuples(&mut self) -> Result<Vec<(usize, usize, T)>> {
        self.wait()?;
        let vlen = self.vlen();
        let mut out = Vec::new();
        match &self.store {
            Store::Sparse { p, i, x, .. } => {
                for vec in 0..self.vdim() {
                    for pos in p[vec] as usize..p[vec + 1] as usize {
                        let (r, c) = self.to_logical(i[pos], vec as i64);
                        out.push((r, c, x[pos]));
                    }
                }
            }
            Store::Hyper { h, p, i, x, .. } => {
                for k in 0..h.len() {
                    for pos in p[k] as usize..p[k + 1] as usize {
                        let (r, c) = self.to_logical(i[pos], h[k]);
                        out.push((r, c, x[pos]));
                    }
                }
            }
            Store::Bitmap { b, x, .. } => {
                for vec in 0..self.vdim() {
                    for idx in 0..vlen {
                        let off = vec * vlen + idx;
                        if b[off] != 0 {
                            let (r, c) = self.to_logical(idx as i64, vec as i64);
                            out.push((r, c, x[off]));
                        }
                    }
                }
            }
            Store::Full { x } => {
                for vec in 0..self.vdim() {
                    for idx in 0..vlen {
                        let (r, c) = self.to_logical(idx as i64, vec as i64);
                        out.push((r, c, x[vec * vlen + idx]));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Finishes deferred work with last-wins duplicate handling.
    pub fn wait(&mut self) -> Result<()> {
        self.wait_with::<Second<T>>()
    }

    /// A borrowed view of clean sparse or hypersparse storage.
    pub(crate) fn sparse_ref(&self) -> Option<SparseRef<'_, T>> {
        match &self.store {
            Store::Sparse { p, i, x, pending } if pending.is_clean() => Some(SparseRef {
                vlen: self.vlen(),
                vdim: self.vdim(),
                h: None,
                p,
                i,
                x,
            }),
            Store::Hyper {
                h, p, i, x, pending,
            } if pending.is_clean() => Some(SparseRef {
                vlen: self.vlen(),
                vdim: self.vdim(),
                h: Some(h),
                p,
                i,
                x,
            }),
            _ => None,
        }
    }

    /// This matrix with deferred work finished, cloning only when needed.
    pub(crate) fn cleaned(&self) -> Result<Cow<'_, Self>> {
        if self.has_pending_work() {
            let mut copy = self.clone();
            copy.wait()?;
            Ok(Cow::Owned(copy))
        } else {
            Ok(Cow::Borrowed(self))
        }
    }

    /// This matrix as clean sparse or hypersparse storage, cloning only when
    /// needed.
    pub(crate) fn as_sparse(&self) -> Result<Cow<'_, Self>> {
        match (&self.store, self.has_pending_work()) {
            (Store::Sparse { .. } | Store::Hyper { .. }, false) => Ok(Cow::Borrowed(self)),
            _ => {
                let mut copy = self.clone();
                copy.wait()?;
                if matches!(copy.store, Store::Bitmap { .. } | Store::Full { .. }) {
                    copy.to_sparse()?;
                }
                Ok(Cow::Owned(copy))
            }
        }
    }

    /// Validates the storage invariants. Debug builds call this from the
    /// mutating paths; release builds use it only in tests.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvariantViolation(msg));
        let (vlen, vdim) = (self.vlen(), self.vdim());
        match &self.store {
            Store::Full { x } => {
                if x.len() != vlen * vdim {
                    return fail(format!("full: {} values for {vlen}x{vdim}", x.len()));
                }
            }
            Store::Bitmap { b, x, nvals } => {
                if b.len() != vlen * vdim || x.len() != vlen * vdim {
                    return fail("bitmap: array length mismatch".into());
                }
                if b.iter().any(|&bit| bit > 1) {
                    return fail("bitmap: occupancy byte not 0/1".into());
                }
                if *nvals != b.iter().filter(|&&bit| bit != 0).count() {
                    return fail("bitmap: nvals out of sync".into());
                }
            }
            Store::Sparse { p, i, x, pending } => {
                check_vectors(p, i, x, pending, vdim, vlen, None)?;
            }
            Store::Hyper {
                h, p, i, x, pending,
            } => {
                if h.len() + 1 != p.len() || h.len() > vdim {
                    return fail("hyper: vector table length".into());
                }
                if h.windows(2).any(|w| w[0] >= w[1]) {
                    return fail("hyper: vector ids not strictly ascending".into());
                }
                if h.iter().any(|&j| j < 0 || j >= vdim as i64) {
                    return fail("hyper: vector id out of range".into());
                }
                check_vectors(p, i, x, pending, h.len(), vlen, Some(h))?;
            }
        }
        Ok(())
    }
}

/// Clean sparse/hypersparse storage, borrowed for kernels.
#[derive(Clone, Copy)]
pub(crate) struct SparseRef<'a, T> {
    pub vlen: usize,
    pub vdim: usize,
    pub h: Option<&'a [i64]>,
    pub p: &'a [i64],
    pub i: &'a [i64],
    pub x: &'a [T],
}

impl<'a, T> SparseRef<'a, T> {
    pub fn nvec(&self) -> usize {
        self.p.len() - 1
    }

    /// Vector id of the `k`-th stored vector.
    #[inline]
    pub fn vec_id(&self, k: usize) -> i64 {
        match self.h {
            Some(h) => h[k],
            None => k as i64,
        }
    }

    #[inline]
    pub fn range(&self, k: usize) -> (usize, usize) {
        (self.p[k] as usize, self.p[k + 1] as usize)
    }

    /// Position of vector `j` in the store, if present.
    pub fn find(&self, j: i64) -> Option<usize> {
        match self.h {
            Some(h) => h.binary_search(&j).ok(),
            None => (j >= 0 && (j as usize) < self.nvec()).then_some(j as usize),
        }
    }
}

/// Binary search that compares decoded indices, so zombies keep their sort
/// position.
fn search_unflipped(iarr: &[i64], target: i64) -> Option<usize> {
    let mut lo = 0;
    let mut hi = iarr.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if unflip(iarr[mid]) < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (lo < iarr.len() && unflip(iarr[lo]) == target).then_some(lo)
}

fn check_vectors<T>(
    p: &[i64],
    i: &[i64],
    x: &[T],
    pending: &Pending<T>,
    nvec: usize,
    vlen: usize,
    _h: Option<&[i64]>,
) -> Result<()> {
    let fail = |msg: String| Err(Error::InvariantViolation(msg));
    if p.len() != nvec + 1 || p[0] != 0 {
        return fail("offset table malformed".into());
    }
    if p.windows(2).any(|w| w[0] > w[1]) {
        return fail("offsets decreasing".into());
    }
    let nz = *p.last().unwrap() as usize;
    if i.len() != nz || x.len() != nz {
        return fail(format!("{nz} offsets vs {} indices", i.len()));
    }
    let mut zombies = 0;
    for k in 0..nvec {
        let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
        for pos in lo..hi {
            let raw = i[pos];
            if is_zombie(raw) {
                zombies += 1;
            }
            let idx = unflip(raw);
            if idx < 0 || idx >= vlen as i64 {
                return fail(format!("index {idx} outside vector of length {vlen}"));
            }
            if !pending.jumbled && pos > lo && unflip(i[pos - 1]) >= idx {
                return fail("vector not strictly ascending while not jumbled".into());
            }
        }
    }
    if zombies != pending.nzombies {
        return fail(format!(
            "zombie count {zombies} != recorded {}",
            pending.nzombies
        ));
    }
    Ok(())
}
