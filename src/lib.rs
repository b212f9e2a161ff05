//! First-fit memory manager over a flat address range.
//!
//! A [`MemorySpace`] hands out address ranges with `malloc`, takes them
//! back with `free`, and coalesces adjacent free ranges with `defrag`.
//! Both its free and allocated pools are [`BlockSequence`]s.

pub mod command;
pub mod memory;

pub use memory::{BlockSequence, EntryId, MemoryBlock, MemoryError, MemorySpace};
