mod block;
mod error;
mod sequence;
mod space;

pub use block::MemoryBlock;
pub use error::MemoryError;
pub use sequence::{BlockSequence, EntryId, Iter};
pub use space::MemorySpace;
