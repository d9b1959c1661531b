//! Scalar types and the operator family the engine's kernels are generated
//! over.
//!
//! The engine instantiates every algorithm once, generically, over the traits
//! here; monomorphization then produces one specialized kernel per
//! (scalar type × operator) combination actually used.

#![allow(clippy::needless_range_loop)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod binop;
pub mod monoid;
pub mod scalar;
pub mod semiring;
pub mod unary;

pub use binop::BinaryOp;
pub use monoid::Monoid;
pub use scalar::Scalar;
pub use semiring::Semiring;
pub use unary::UnaryOp;
