use thiserror::Error;

/// The closed set of failure kinds the engine reports.
///
/// Stringification for end users is the binding layer's job; the engine only
/// distinguishes kinds and attaches a short context message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A caller-visible mistake: unknown format string, index out of range,
    /// output not empty, an option outside its legal domain.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Operand shapes incompatible with the requested operation.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An allocation failed while converting, growing scratch, or building an
    /// output.
    #[error("out of memory")]
    OutOfMemory,

    /// An internal assertion failed. Only produced by debug checks.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Process exit code when the engine backs a command-line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BadInput(_) | Error::DimensionMismatch(_) => 1,
            Error::OutOfMemory => 2,
            Error::InvariantViolation(_) => 3,
        }
    }
}

/// Allocates a zero-initialized `Vec`, reporting failure instead of aborting.
pub(crate) fn alloc_vec<T: Clone>(value: T, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.resize(len, value);
    Ok(v)
}

/// Reserves `extra` additional slots, reporting failure instead of aborting.
pub(crate) fn reserve<T>(v: &mut Vec<T>, extra: usize) -> Result<()> {
    v.try_reserve(extra).map_err(|_| Error::OutOfMemory)
}
