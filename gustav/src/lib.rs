//! A GraphBLAS-style sparse linear algebra engine.
//!
//! Matrices are mathematical objects; the caller picks a semiring and the
//! engine picks storage. Each matrix lives in one of four formats
//! (hypersparse, sparse, bitmap, full) and moves between them under a
//! per-matrix policy, with deletions, out-of-order vectors and unmerged
//! insertions carried as deferred work until an operation needs a clean
//! view.
//!
//! ```
//! use gustav::ring::semiring::PlusTimes;
//! use gustav::{mxm, Context, Descriptor, Matrix, NoAccum, Orientation};
//!
//! let ctx = Context::new(2, 0);
//! let mut a = Matrix::<i32>::new(2, 2, Orientation::ByCol).unwrap();
//! a.set_element(0, 0, 1).unwrap();
//! a.set_element(1, 1, 2).unwrap();
//! let mut c = Matrix::<i32>::new(2, 2, Orientation::ByCol).unwrap();
//! mxm::<PlusTimes<i32>, NoAccum>(&ctx, &mut c, None, &a, &a, &Descriptor::new()).unwrap();
//! assert_eq!(c.get_element(1, 1).unwrap(), Some(4));
//! ```

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use gustav_ring as ring;

pub mod burble;
pub mod context;
pub mod error;
pub mod matrix;
pub mod ops;
pub mod slice;

#[cfg(test)]
mod engine_test;

pub use crate::burble::{burble, set_burble};
pub use crate::context::Context;
pub use crate::error::{Error, Result};
pub use crate::matrix::{Format, Matrix, Orientation, Sparsity};
pub use crate::ops::apply::apply;
pub use crate::ops::assign::assign;
pub use crate::ops::descriptor::{AxbMethod, Descriptor, InputOption, MaskOption, OutputOption};
pub use crate::ops::ewise::{ewise_add, ewise_mult};
pub use crate::ops::extract::extract;
pub use crate::ops::mxm::mxm;
pub use crate::ops::{AccumWith, Accumulator, NoAccum};
