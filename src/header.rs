//! Header Codec
//!
//! Packs a fixed set of named integer fields into the tail of a block and
//! guards the whole block with a trailing CRC32.
//!
//! ## Block Tail Layout
//! ```text
//! ┌──────────────────────────────┬───────────────────────────┬───────────┐
//! │ Object bytes / index words   │ Fields (big-endian)       │ CRC32 (4) │
//! │                              │ sorted by (width, name)   │ LE        │
//! └──────────────────────────────┴───────────────────────────┴───────────┘
//! ```
//!
//! Appending the little-endian CRC32 of a buffer to that buffer makes the
//! CRC32 of the result a constant (`CRC32_MAGIC`). A block is therefore valid
//! iff `crc32(block) == CRC32_MAGIC`; no separate expected value is stored.

use tracing::warn;

use crate::error::{DbError, Result};

/// CRC32 residue of any buffer followed by its own little-endian CRC32
pub const CRC32_MAGIC: u32 = 558_161_692;

/// Size of the trailing checksum
pub const CHECKSUM_SIZE: usize = 4;

/// Width of a packed header field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    /// Number of bytes occupied on disk
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }
}

/// A named header field as declared by an object type
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub width: Width,
}

impl Field {
    pub const fn new(name: &'static str, width: Width) -> Self {
        Self { name, width }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    name: &'static str,
    width: Width,
    /// Offset from the start of the header region
    offset: usize,
}

/// Packing schema for one object type, computed once per type
#[derive(Debug)]
pub struct Layout {
    slots: Vec<Slot>,
    size: usize,
}

impl Layout {
    /// Build a layout from declared fields
    ///
    /// Fields are ordered by width, then by name, so the packing is
    /// independent of declaration order.
    pub fn new(fields: &[Field]) -> Self {
        let mut sorted = fields.to_vec();
        sorted.sort_by(|a, b| (a.width.bytes(), a.name).cmp(&(b.width.bytes(), b.name)));

        let mut offset = 0;
        let slots = sorted
            .into_iter()
            .map(|field| {
                let slot = Slot {
                    name: field.name,
                    width: field.width,
                    offset,
                };
                offset += field.width.bytes();
                slot
            })
            .collect();

        Self {
            slots,
            size: offset + CHECKSUM_SIZE,
        }
    }

    /// Header size in bytes, checksum included
    pub fn size(&self) -> usize {
        self.size
    }

    /// Field names in packing order
    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.name).collect()
    }

    /// Read a field from a block (no checksum verification)
    pub fn get(&self, block: &[u8], name: &str) -> u64 {
        let (start, width) = self.locate(block.len(), name);
        block[start..start + width]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// Write a field into a block; the block must be sealed afterwards
    pub fn set(&self, block: &mut [u8], name: &str, value: u64) {
        let (start, width) = self.locate(block.len(), name);
        debug_assert!(
            width == 8 || value >> (width * 8) == 0,
            "value {} does not fit field {}",
            value,
            name
        );
        for (i, byte) in block[start..start + width].iter_mut().enumerate() {
            *byte = (value >> (8 * (width - 1 - i))) as u8;
        }
    }

    /// Load-time integrity check for the block at `block_index`
    pub fn check(block: &[u8], block_index: u32) -> Result<()> {
        if verify(block) {
            Ok(())
        } else {
            warn!(block = block_index, "checksum mismatch");
            Err(DbError::Corruption { block: block_index })
        }
    }

    fn locate(&self, block_len: usize, name: &str) -> (usize, usize) {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("unknown header field {}", name));
        (block_len - self.size + slot.offset, slot.width.bytes())
    }
}

/// Write the trailing CRC32 over everything preceding it
pub fn seal(block: &mut [u8]) {
    let end = block.len() - CHECKSUM_SIZE;
    let crc = crc32fast::hash(&block[..end]);
    block[end..].copy_from_slice(&crc.to_le_bytes());
}

/// True iff the block carries a matching trailing CRC32
pub fn verify(block: &[u8]) -> bool {
    crc32fast::hash(block) == CRC32_MAGIC
}
