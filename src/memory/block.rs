use std::fmt;

/// Contiguous address range `[base_address, base_address + length)`.
///
/// Blocks are compared by value. The sequences hand out mutable access to
/// a stored block so a split or a merge adjusts it in place instead of
/// replacing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryBlock {
    /// Start of the range.
    pub base_address: usize,
    /// Size of the range, never zero for a stored block.
    pub length: usize,
}

impl MemoryBlock {
    pub fn new(base_address: usize, length: usize) -> Self {
        Self {
            base_address,
            length,
        }
    }

    /// First address past the end of the block.
    pub fn end(&self) -> usize {
        self.base_address + self.length
    }

    /// Whether `other` starts exactly where this block ends.
    pub fn is_adjacent_to(&self, other: &MemoryBlock) -> bool {
        self.end() == other.base_address
    }

    pub fn overlaps(&self, other: &MemoryBlock) -> bool {
        self.base_address < other.end() && other.base_address < self.end()
    }
}

impl fmt::Display for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} , {})", self.base_address, self.length)
    }
}
