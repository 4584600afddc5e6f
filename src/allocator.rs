//! Block Allocator
//!
//! Hands out and reclaims physical block indices. Freed blocks are kept on a
//! free list that is itself a `u32` array rooted at block 1, so the list lives
//! on the device it allocates for.
//!
//! ## Responsibilities
//! - `allocate`: reuse the most recently freed block, else grow the device
//! - `free`: remember a block for reuse
//! - Keep the free list's own storage changes from recursing into itself
//!
//! ## Storage Policy
//! The free list keeps one spare slot, like every array. When the list runs
//! out of room, the block being freed becomes the list's next storage block
//! instead of an entry. When the list's last storage unit holds no entries,
//! `allocate` detaches that unit and hands its block out instead of popping.
//! Neither path calls back into the allocator, so no operation recurses, and
//! `free(b); allocate()` returns `b` even across a storage boundary.

use tracing::debug;

use crate::array::Array;
use crate::device::BlockFile;
use crate::error::{DbError, Result};
use crate::page::{index1, PageKind, ONE_LEVEL};

/// Root block of the free list
pub const FREELIST_ROOT: u32 = 1;

/// Block source and sink for page operations
///
/// Implemented by the database (backed by the free list) and by the free
/// list's private reserve (backed directly by the device).
pub trait BlockHost {
    fn device(&self) -> &BlockFile;

    fn device_mut(&mut self) -> &mut BlockFile;

    /// Obtain an unused block
    fn allocate(&mut self) -> Result<u32>;

    /// Return a block for reuse
    fn free(&mut self, block: u32) -> Result<()>;
}

/// LIFO free list stored as an array of block indices
pub struct FreeList {
    blocks: Array<u32>,
}

impl FreeList {
    /// Create the free list in a fresh device (which holds only block 0)
    pub fn create(device: &mut BlockFile) -> Result<Self> {
        let root = device.grow()?;
        if root != FREELIST_ROOT {
            return Err(DbError::Format(format!(
                "free list root allocated at block {}, expected {}",
                root, FREELIST_ROOT
            )));
        }
        let blocks = Array::init(device, root)?;
        Ok(Self { blocks })
    }

    /// Load the free list of an existing device
    pub fn load(device: &BlockFile) -> Result<Self> {
        let blocks = Array::open(device, FREELIST_ROOT)?;
        Ok(Self { blocks })
    }

    /// Number of free blocks remembered
    pub fn len(&self) -> u64 {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Storage class of the list's own page
    pub fn kind(&self) -> PageKind {
        self.blocks.kind()
    }

    /// Storage blocks used by the list
    pub fn num_blocks(&self) -> u32 {
        self.blocks.num_blocks()
    }

    pub fn capacity(&self) -> u64 {
        self.blocks.capacity()
    }

    /// Free block indices, oldest first
    pub fn entries(&mut self, device: &BlockFile) -> Result<Vec<u32>> {
        (0..self.blocks.len())
            .map(|i| self.blocks.read(device, i))
            .collect()
    }

    /// Obtain an unused block
    pub fn allocate(&mut self, device: &mut BlockFile) -> Result<u32> {
        if let Some(block) = self.release_spare(device)? {
            return Ok(block);
        }
        if self.blocks.is_empty() {
            return device.grow();
        }
        self.blocks.pop_within(device)
    }

    /// Remember `block` for reuse
    pub fn free(&mut self, device: &mut BlockFile, block: u32) -> Result<()> {
        if self.blocks.capacity() >= self.blocks.len() + 2 {
            return self.blocks.push_within(device, block);
        }

        // No room for the entry plus a spare slot: `block` becomes storage
        let mut reserve = Reserve::new(device, Some(block));
        self.blocks.grow_unit(&mut reserve)?;
        debug_assert!(reserve.supply.is_none());

        debug!(
            block,
            num_blocks = self.blocks.num_blocks(),
            "free block absorbed as free list storage"
        );
        Ok(())
    }

    /// Detach an empty trailing storage unit and return its data block
    fn release_spare(&mut self, device: &mut BlockFile) -> Result<Option<u32>> {
        let Some(shrunk) = self.blocks.shrunk_capacity() else {
            return Ok(None);
        };

        // The last data block may also be the first entry of a page table
        let last = self.blocks.num_blocks() - 1;
        let released = if last >= ONE_LEVEL && index1(last) == 0 { 2 } else { 1 };
        if shrunk < self.blocks.len() + released {
            return Ok(None);
        }

        let mut reserve = Reserve::new(device, None);
        self.blocks.shrink_unit(&mut reserve)?;
        let mut freed = reserve.released.into_iter();

        let Some(block) = freed.next() else {
            return Ok(None);
        };
        for table in freed {
            self.blocks.push_within(device, table)?;
        }

        debug!(
            block,
            num_blocks = self.blocks.num_blocks(),
            "free list released a storage block"
        );
        Ok(Some(block))
    }
}

/// Host used while the free list reshapes its own storage
///
/// Allocation takes the supplied block first, then grows the device; freed
/// blocks are collected for the caller instead of re-entering the list.
struct Reserve<'a> {
    device: &'a mut BlockFile,
    supply: Option<u32>,
    released: Vec<u32>,
}

impl<'a> Reserve<'a> {
    fn new(device: &'a mut BlockFile, supply: Option<u32>) -> Self {
        Self {
            device,
            supply,
            released: Vec::new(),
        }
    }
}

impl BlockHost for Reserve<'_> {
    fn device(&self) -> &BlockFile {
        &*self.device
    }

    fn device_mut(&mut self) -> &mut BlockFile {
        &mut *self.device
    }

    fn allocate(&mut self) -> Result<u32> {
        match self.supply.take() {
            Some(block) => Ok(block),
            None => self.device.grow(),
        }
    }

    fn free(&mut self, block: u32) -> Result<()> {
        self.released.push(block);
        Ok(())
    }
}
