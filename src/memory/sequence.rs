use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use super::block::MemoryBlock;
use super::error::MemoryError;

/// Source of sequence identities, so that a handle minted by one
/// sequence is never mistaken for an entry of another one.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Key of an entry within the storage of its sequence.
type EntryKey = u64;

/// Stable handle to one entry of a `BlockSequence`.
///
/// A handle stays valid until its entry is removed, whatever happens to
/// the other entries around it, which lets the allocator shrink or grow
/// one precise entry even when another one holds an equal block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryId {
    sequence: u64,
    key: EntryKey,
}

/// Node of the sequence: the stored block and the keys of its
/// neighbours.
#[derive(Debug)]
struct Entry {
    block: MemoryBlock,
    prev: Option<EntryKey>,
    next: Option<EntryKey>,
}

/// Ordered, mutable sequence of memory blocks.
///
/// Entries live in a map indexed by key and are chained through their
/// `prev`/`next` keys, so inserting at either end and removing a known
/// entry never moves the other entries. Positional access walks the chain
/// from the head.
pub struct BlockSequence {
    /// Identity stamped into every handle this sequence hands out.
    id: u64,
    /// Storage of the entries, in no particular order.
    entries: HashMap<EntryKey, Entry>,
    /// Key of the head of the chain.
    first: Option<EntryKey>,
    /// Key of the tail of the chain.
    last: Option<EntryKey>,
    /// Next key to hand out. Keys are never reused.
    key_counter: EntryKey,
}

impl BlockSequence {
    pub fn new() -> Self {
        Self {
            id: SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed),
            entries: HashMap::new(),
            first: None,
            last: None,
            key_counter: 0,
        }
    }

    /// Number of entries in the sequence.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle of the first entry, if any.
    pub fn first(&self) -> Option<EntryId> {
        self.first.map(|key| self.handle(key))
    }

    /// Handle of the last entry, if any.
    pub fn last(&self) -> Option<EntryId> {
        self.last.map(|key| self.handle(key))
    }

    /// Handle of the entry at `index`, which must be in `[0, size)`.
    pub fn entry_at(&self, index: usize) -> Result<EntryId, MemoryError> {
        self.key_at(index).map(|key| self.handle(key))
    }

    /// Block stored at `index`, which must be in `[0, size)`.
    pub fn block_at(&self, index: usize) -> Result<&MemoryBlock, MemoryError> {
        let key = self.key_at(index)?;
        self.entries
            .get(&key)
            .map(|entry| &entry.block)
            .ok_or(MemoryError::OutOfRange { index, size: self.size() })
    }

    /// Block held by `entry`, or `None` if the handle does not belong to
    /// this sequence (anymore).
    pub fn block(&self, entry: EntryId) -> Option<&MemoryBlock> {
        self.key_of(entry)
            .ok()
            .and_then(|key| self.entries.get(&key))
            .map(|entry| &entry.block)
    }

    /// Mutable access to the block held by `entry`, for in-place splits
    /// and merges.
    pub fn block_mut(&mut self, entry: EntryId) -> Option<&mut MemoryBlock> {
        let key = self.key_of(entry).ok()?;
        self.entries.get_mut(&key).map(|entry| &mut entry.block)
    }

    pub fn contains(&self, entry: EntryId) -> bool {
        self.key_of(entry).is_ok()
    }

    /// Inserts `block` so that it ends up at position `index`, which must
    /// be in `[0, size]`. Inserting at either end is O(1); anywhere else
    /// walks from the head.
    pub fn insert_at(&mut self, index: usize, block: MemoryBlock) -> Result<EntryId, MemoryError> {
        let size = self.size();
        if index > size {
            return Err(MemoryError::OutOfRange { index, size });
        }

        if index == size {
            return Ok(self.append_last(block));
        }
        if index == 0 {
            return Ok(self.insert_first(block));
        }

        // The new entry goes right before the one currently at
        // `index`, which then shifts one position down along with
        // everything after it.
        let next = self.key_at(index)?;
        let prev = self.entries.get(&next).and_then(|entry| entry.prev);
        let key = self.next_key();

        self.entries.insert(key, Entry { block, prev, next: Some(next) });
        if let Some(next_entry) = self.entries.get_mut(&next) {
            next_entry.prev = Some(key);
        }
        if let Some(prev_entry) = prev.and_then(|prev| self.entries.get_mut(&prev)) {
            prev_entry.next = Some(key);
        }

        trace!("Inserted {} at position {}.", block, index);
        Ok(self.handle(key))
    }

    /// Appends `block` after the current last entry.
    pub fn append_last(&mut self, block: MemoryBlock) -> EntryId {
        let key = self.next_key();
        self.entries.insert(key, Entry { block, prev: self.last, next: None });

        match self.last.and_then(|last| self.entries.get_mut(&last)) {
            Some(last_entry) => last_entry.next = Some(key),
            None => self.first = Some(key),
        }
        self.last = Some(key);

        trace!("Appended {}.", block);
        self.handle(key)
    }

    /// Inserts `block` before the current first entry.
    pub fn insert_first(&mut self, block: MemoryBlock) -> EntryId {
        let key = self.next_key();
        self.entries.insert(key, Entry { block, prev: None, next: self.first });

        match self.first.and_then(|first| self.entries.get_mut(&first)) {
            Some(first_entry) => first_entry.prev = Some(key),
            None => self.last = Some(key),
        }
        self.first = Some(key);

        trace!("Prepended {}.", block);
        self.handle(key)
    }

    /// Position of the first block equal to `block`, or `None`.
    pub fn index_of(&self, block: &MemoryBlock) -> Option<usize> {
        self.iter().position(|stored| stored == block)
    }

    /// Removes exactly the entry `entry` refers to and returns its block.
    ///
    /// Fails with `InvalidArgument` when no handle is given and with
    /// `NotFound` when the handle is not an entry of this sequence.
    pub fn remove_entry(&mut self, entry: Option<EntryId>) -> Result<MemoryBlock, MemoryError> {
        let entry = entry.ok_or(MemoryError::InvalidArgument("entry to remove cannot be absent"))?;
        let key = self.key_of(entry)?;
        self.unlink(key)
    }

    /// Removes the entry at `index`, which must be in `[0, size)`.
    pub fn remove_at(&mut self, index: usize) -> Result<MemoryBlock, MemoryError> {
        let key = self.key_at(index)?;
        self.unlink(key)
    }

    /// Removes the first entry whose block equals `block`.
    pub fn remove_by_value(&mut self, block: &MemoryBlock) -> Result<MemoryBlock, MemoryError> {
        let key = self
            .keys()
            .find(|key| self.entries.get(key).is_some_and(|entry| entry.block == *block))
            .ok_or(MemoryError::NotFound)?;
        self.unlink(key)
    }

    /// Forward pass over the stored blocks, starting from the head.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            keys: self.keys(),
        }
    }

    /// Forward pass over the entries, yielding each handle with its block.
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &MemoryBlock)> + '_ {
        self.keys().filter_map(|key| {
            self.entries
                .get(&key)
                .map(|entry| (self.handle(key), &entry.block))
        })
    }

    /// Sum of the lengths of all stored blocks.
    pub fn total_length(&self) -> usize {
        self.iter().map(|block| block.length).sum()
    }

    fn handle(&self, key: EntryKey) -> EntryId {
        EntryId {
            sequence: self.id,
            key,
        }
    }

    fn key_of(&self, entry: EntryId) -> Result<EntryKey, MemoryError> {
        if entry.sequence == self.id && self.entries.contains_key(&entry.key) {
            Ok(entry.key)
        } else {
            Err(MemoryError::NotFound)
        }
    }

    fn key_at(&self, index: usize) -> Result<EntryKey, MemoryError> {
        let size = self.size();
        if index >= size {
            return Err(MemoryError::OutOfRange { index, size });
        }

        self.keys()
            .nth(index)
            .ok_or(MemoryError::OutOfRange { index, size })
    }

    fn keys(&self) -> Keys<'_> {
        Keys {
            entries: &self.entries,
            cursor: self.first,
        }
    }

    fn next_key(&mut self) -> EntryKey {
        let key = self.key_counter;
        self.key_counter += 1;
        key
    }

    fn unlink(&mut self, key: EntryKey) -> Result<MemoryBlock, MemoryError> {
        let entry = self.entries.remove(&key).ok_or(MemoryError::NotFound)?;

        // Stitch the neighbours of the removed entry together, moving
        // the head or the tail of the chain when the entry sat at one
        // of the ends.
        match entry.prev.and_then(|prev| self.entries.get_mut(&prev)) {
            Some(prev_entry) => prev_entry.next = entry.next,
            None => self.first = entry.next,
        }
        match entry.next.and_then(|next| self.entries.get_mut(&next)) {
            Some(next_entry) => next_entry.prev = entry.prev,
            None => self.last = entry.prev,
        }

        trace!("Removed {}.", entry.block);
        Ok(entry.block)
    }
}

impl Default for BlockSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.iter() {
            write!(f, "{} ", block)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a BlockSequence {
    type Item = &'a MemoryBlock;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks the chain of keys from a starting entry.
struct Keys<'a> {
    entries: &'a HashMap<EntryKey, Entry>,
    cursor: Option<EntryKey>,
}

impl Iterator for Keys<'_> {
    type Item = EntryKey;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        self.cursor = self.entries.get(&key).and_then(|entry| entry.next);
        Some(key)
    }
}

/// Iterator over the blocks of a `BlockSequence`, head first.
pub struct Iter<'a> {
    keys: Keys<'a>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a MemoryBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.keys.entries;
        self.keys
            .next()
            .and_then(|key| entries.get(&key))
            .map(|entry| &entry.block)
    }
}
