use thiserror::Error;

/// Errors reported by the block sequences and the memory space.
///
/// Allocation failure is not an error: `malloc` reports it with `None`,
/// and freeing an address that is not allocated is a no-op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A positional access fell outside the valid range of the sequence.
    #[error("index {index} out of range for sequence of size {size}")]
    OutOfRange { index: usize, size: usize },
    /// A value or entry lookup did not match anything in the sequence.
    #[error("no matching block in sequence")]
    NotFound,
    /// The operation makes no sense in the current state of the space.
    #[error("{0}")]
    InvalidState(&'static str),
    /// The caller passed an unusable argument (an absent entry handle).
    #[error("{0}")]
    InvalidArgument(&'static str),
}
