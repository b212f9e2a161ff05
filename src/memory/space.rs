use std::fmt;

use log::debug;

use super::block::MemoryBlock;
use super::error::MemoryError;
use super::sequence::{BlockSequence, EntryId};

/// Managed memory space over the flat address range `[0, max_size)`.
///
/// The space keeps two block sequences: the free blocks that `malloc`
/// carves allocations from, and the allocated blocks that `free` hands
/// back. Freed blocks are not merged with their neighbours until `defrag`
/// is called.
///
/// Every operation takes `&mut self`; a space shared between threads
/// must sit behind a single lock, since `malloc` and `free` both need a
/// consistent view of the two sequences at once.
pub struct MemorySpace {
    /// Blocks currently available for allocation.
    free: BlockSequence,
    /// Blocks currently handed out by `malloc`.
    allocated: BlockSequence,
    /// Size of the managed address range.
    max_size: usize,
}

impl MemorySpace {
    pub fn new(max_size: usize) -> Self {
        // At first nothing is allocated, so the whole range is a
        // single free block starting at address 0. An empty range
        // has no block at all, since a stored block is never empty.
        let mut free = BlockSequence::new();
        if max_size > 0 {
            free.append_last(MemoryBlock::new(0, max_size));
        }

        Self {
            free,
            allocated: BlockSequence::new(),
            max_size,
        }
    }

    /// Allocates `length` addresses with a first-fit strategy and returns
    /// the base address of the new block, or `None` if no free block is
    /// large enough. Nothing changes when the allocation fails.
    pub fn malloc(&mut self, length: usize) -> Option<usize> {
        if length == 0 {
            return None;
        }

        // Take the first free block, in sequence order, that is large
        // enough to hold the allocation.
        let (entry, free_block) = self.first_fit(length)?;
        let allocated = MemoryBlock::new(free_block.base_address, length);

        if free_block.length == length {
            // An exact fit consumes the whole free block, so its entry
            // leaves the free sequence. The handle was just found in
            // that sequence, so the removal cannot miss.
            self.free.remove_entry(Some(entry)).ok()?;
            debug!("Allocated {} from an exact fit.", allocated);
        } else {
            // Otherwise the free block is split: the allocation takes
            // its front, and the remainder stays in the free sequence
            // at the same position, shrunk in place.
            let remainder = self.free.block_mut(entry)?;
            remainder.base_address += length;
            remainder.length -= length;
            debug!("Allocated {}, leaving {} free.", allocated, remainder);
        }

        self.allocated.append_last(allocated);
        Some(allocated.base_address)
    }

    /// Frees the allocated block starting at `address` and appends it to
    /// the free sequence, without merging it with its neighbours.
    ///
    /// Fails with `InvalidState` when nothing is allocated at all. An
    /// address that is not the base of an allocated block is ignored.
    pub fn free(&mut self, address: usize) -> Result<(), MemoryError> {
        if self.allocated.is_empty() {
            return Err(MemoryError::InvalidState("no block is currently allocated"));
        }

        // Look for the allocated block that starts at the address.
        let entry = self
            .allocated
            .entries()
            .find(|(_, block)| block.base_address == address)
            .map(|(entry, _)| entry);

        let Some(entry) = entry else {
            debug!("Ignoring free of unallocated address {}.", address);
            return Ok(());
        };

        // The block moves over as is: it is appended raw at the end of
        // the free sequence, and coalescing waits for `defrag`.
        let block = self.allocated.remove_entry(Some(entry))?;
        self.free.append_last(block);
        debug!("Freed {}.", block);

        Ok(())
    }

    /// Merges every pair of address-adjacent free blocks, whatever their
    /// order in the free sequence, until no adjacent pair remains.
    pub fn defrag(&mut self) {
        // Each merge removes an entry from the free sequence, so the
        // scan starts over from the head after every merge. A grown
        // block may have become adjacent to another one, which the next
        // scan then picks up. The loop stops once a full scan finds
        // nothing left to merge.
        let mut merges = 0;
        while self.merge_adjacent_pair() {
            merges += 1;
        }

        debug!(
            "Defragmentation done: {} merges, {} free blocks left.",
            merges,
            self.free.size()
        );
    }

    /// Size of the managed address range.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn free_blocks(&self) -> &BlockSequence {
        &self.free
    }

    pub fn allocated_blocks(&self) -> &BlockSequence {
        &self.allocated
    }

    /// Total length of the free blocks.
    pub fn free_size(&self) -> usize {
        self.free.total_length()
    }

    /// Total length of the allocated blocks.
    pub fn allocated_size(&self) -> usize {
        self.allocated.total_length()
    }

    pub fn free_count(&self) -> usize {
        self.free.size()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.size()
    }

    /// Checks that the free and allocated blocks stay within the address
    /// range, never overlap, and add up to the whole range.
    pub fn validate(&self) -> Result<(), MemoryError> {
        let blocks: Vec<&MemoryBlock> = self.free.iter().chain(self.allocated.iter()).collect();

        if blocks.iter().any(|block| block.length == 0) {
            return Err(MemoryError::InvalidState("empty block stored"));
        }
        if blocks.iter().any(|block| block.end() > self.max_size) {
            return Err(MemoryError::InvalidState("block extends past the end of the space"));
        }

        // Any two blocks, free or allocated, must cover disjoint
        // ranges.
        let overlapping = blocks.iter().enumerate().any(|(index, block)| {
            blocks[index + 1..].iter().any(|other| block.overlaps(other))
        });
        if overlapping {
            return Err(MemoryError::InvalidState("overlapping blocks"));
        }

        if self.free_size() + self.allocated_size() != self.max_size {
            return Err(MemoryError::InvalidState(
                "free and allocated blocks do not cover the whole space",
            ));
        }

        Ok(())
    }

    fn first_fit(&self, length: usize) -> Option<(EntryId, MemoryBlock)> {
        self.free
            .entries()
            .find(|(_, block)| block.length >= length)
            .map(|(entry, block)| (entry, *block))
    }

    /// Finds one pair of adjacent free blocks and merges the right one
    /// into the left one. Returns whether a merge happened.
    fn merge_adjacent_pair(&mut self) -> bool {
        let pair = self.free.entries().find_map(|(left, block)| {
            self.free
                .entries()
                .find(|(_, other)| block.is_adjacent_to(other))
                .map(|(right, _)| (left, right))
        });

        let Some((left, right)) = pair else {
            return false;
        };

        // The left block grows in place by the length of the right
        // one, whose entry leaves the sequence.
        let Ok(absorbed) = self.free.remove_entry(Some(right)) else {
            return false;
        };
        match self.free.block_mut(left) {
            Some(block) => {
                debug!("Merging {} with {}.", block, absorbed);
                block.length += absorbed.length;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.free, self.allocated)
    }
}

impl fmt::Debug for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySpace")
            .field("max_size", &self.max_size)
            .field("free", &self.free)
            .field("allocated", &self.allocated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_free_block() {
        let space = MemorySpace::new(100);

        assert_eq!(space.to_string(), "(0 , 100) \n");
        assert_eq!(space.free_count(), 1);
        assert_eq!(space.allocated_count(), 0);
        assert!(space.validate().is_ok());
    }

    #[test]
    fn empty_space_has_no_blocks() {
        let mut space = MemorySpace::new(0);

        assert_eq!(space.to_string(), "\n");
        assert_eq!(space.malloc(1), None);
        assert!(space.validate().is_ok());
    }

    #[test]
    fn malloc_splits_in_place() {
        let mut space = MemorySpace::new(100);
        let entry = space.free_blocks().first().unwrap();

        assert_eq!(space.malloc(20), Some(0));
        assert_eq!(space.malloc(30), Some(20));

        // The initial free entry survives, shrunk twice.
        assert_eq!(space.free_blocks().first(), Some(entry));
        assert_eq!(space.to_string(), "(50 , 50) \n(0 , 20) (20 , 30) ");
    }

    #[test]
    fn malloc_exact_fit_removes_the_free_entry() {
        let mut space = MemorySpace::new(10);

        assert_eq!(space.malloc(10), Some(0));
        assert!(space.free_blocks().is_empty());
        assert_eq!(space.to_string(), "\n(0 , 10) ");
        assert_eq!(space.malloc(1), None);
    }

    #[test]
    fn malloc_skips_blocks_that_are_too_small() {
        let mut space = MemorySpace::new(100);
        space.malloc(10);
        space.malloc(50);
        space.free(0).unwrap();

        // Free sequence is now (60 , 40) (0 , 10): the first one fits.
        assert_eq!(space.malloc(35), Some(60));
        // (95 , 5) comes first but is too small for this one.
        assert_eq!(space.malloc(8), Some(0));
        assert_eq!(space.free_blocks().to_string(), "(95 , 5) (8 , 2) ");
        assert_eq!(space.malloc(6), None);
    }

    #[test]
    fn malloc_zero_is_rejected() {
        let mut space = MemorySpace::new(10);

        assert_eq!(space.malloc(0), None);
        assert_eq!(space.to_string(), "(0 , 10) \n");
    }

    #[test]
    fn free_on_empty_allocation_fails() {
        let mut space = MemorySpace::new(10);

        assert!(matches!(space.free(5), Err(MemoryError::InvalidState(_))));
        assert_eq!(space.to_string(), "(0 , 10) \n");
    }

    #[test]
    fn free_of_unknown_address_is_ignored() {
        let mut space = MemorySpace::new(10);
        space.malloc(4);

        // 2 lies inside the allocated block but is not its base.
        assert_eq!(space.free(2), Ok(()));
        assert_eq!(space.to_string(), "(4 , 6) \n(0 , 4) ");
    }

    #[test]
    fn free_appends_without_merging() {
        let mut space = MemorySpace::new(30);
        space.malloc(10);
        space.malloc(10);
        space.free(10).unwrap();
        space.free(0).unwrap();

        assert_eq!(space.free_blocks().to_string(), "(20 , 10) (10 , 10) (0 , 10) ");
        assert!(space.allocated_blocks().is_empty());
    }

    #[test]
    fn defrag_chains_merges_regardless_of_order() {
        let mut space = MemorySpace::new(30);
        space.malloc(10);
        space.malloc(10);
        space.free(10).unwrap();
        space.free(0).unwrap();

        space.defrag();

        assert_eq!(space.free_blocks().to_string(), "(0 , 30) ");
        assert!(space.validate().is_ok());
        assert_eq!(space.malloc(30), Some(0));
    }

    #[test]
    fn defrag_leaves_separated_blocks_alone() {
        let mut space = MemorySpace::new(30);
        space.malloc(10);
        space.malloc(10);
        space.malloc(10);
        space.free(0).unwrap();
        space.free(20).unwrap();

        space.defrag();

        assert_eq!(space.free_blocks().to_string(), "(0 , 10) (20 , 10) ");
        assert_eq!(space.allocated_blocks().to_string(), "(10 , 10) ");
    }

    #[test]
    fn stats_follow_allocations() {
        let mut space = MemorySpace::new(64);
        space.malloc(16);
        space.malloc(8);

        assert_eq!(space.max_size(), 64);
        assert_eq!(space.allocated_size(), 24);
        assert_eq!(space.free_size(), 40);
        assert_eq!(space.allocated_count(), 2);
        assert_eq!(space.free_count(), 1);
    }
}
