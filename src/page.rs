//! Indexed Page
//!
//! Block indirection rooted at a single block. Every object (blob, array,
//! hash) is a page plus a few extra header fields.
//!
//! ## Storage Classes
//! ```text
//! SMALL                                  REGULAR
//! ┌──────────────────────────┬────────┐  ┌──────────────────────────┬────────┐
//! │ object bytes (inline)    │ header │  │ index words              │ header │
//! └──────────────────────────┴────────┘  └──┬───────────┬───────────┴────────┘
//!                                           │ [0, 512)  │ [512, ..)
//!                                           ▼           ▼
//!                                        data block   page table ──► data block
//! ```
//!
//! Logical block `i < ONE_LEVEL` is named directly by index word `i`. Beyond
//! that, index word `INDEX0(i)` names a page-table block whose word
//! `INDEX1(i)` names the data block. Objects up to 512 blocks resolve in one
//! read of the root, larger ones in two.

use std::num::NonZeroUsize;
use std::sync::LazyLock;

use lru::LruCache;
use tracing::{debug, trace};

use crate::allocator::BlockHost;
use crate::device::{BlockFile, BLOCK_SIZE};
use crate::error::{DbError, Result};
use crate::header::{self, Field, Layout, Width};

// =============================================================================
// Index Geometry
// =============================================================================

pub const BLOCK_BITS: u32 = 12;
pub const BLOCK_MASK: u64 = (1 << BLOCK_BITS) - 1;

/// Block pointers per page-table block
pub const INDEX_BITS: u32 = 10;
pub const INDEX_SIZE: u32 = 1 << INDEX_BITS;
pub const INDEX_MASK: u32 = INDEX_SIZE - 1;

/// Root index words used as one-level block pointers
pub const ONE_LEVEL: u32 = INDEX_SIZE >> 1;

/// Root index word holding the page table for logical block `i >= ONE_LEVEL`
pub const fn index0(i: u32) -> u32 {
    ONE_LEVEL + (((i - ONE_LEVEL) >> INDEX_BITS) & INDEX_MASK)
}

/// Page-table word holding the data block for logical block `i >= ONE_LEVEL`
pub const fn index1(i: u32) -> u32 {
    (i - ONE_LEVEL) & INDEX_MASK
}

/// Two-level translations kept per page
const INDEX_CACHE_CAPACITY: usize = 64;

// =============================================================================
// Header Layout
// =============================================================================

/// Fields shared by every page-based object
pub(crate) const PAGE_FIELDS: [Field; 2] = [
    Field::new("num_blocks", Width::U32),
    Field::new("type", Width::U8),
];

static PAGE_LAYOUT: LazyLock<Layout> = LazyLock::new(|| Layout::new(&PAGE_FIELDS));

/// Storage class of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    /// Object bytes live in the root block itself
    Small = 1,
    /// Root block is an index of separately allocated data blocks
    Regular = 2,
}

impl PageKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Small),
            2 => Ok(PageKind::Regular),
            _ => Err(DbError::Format(format!("invalid page type {}", value))),
        }
    }
}

/// A rooted set of blocks with SMALL/REGULAR indirection
pub struct Page {
    root: u32,
    kind: PageKind,
    num_blocks: u32,
    layout: &'static Layout,
    /// Logical -> host translations for two-level blocks
    cache: Option<LruCache<u32, u32>>,
}

impl Page {
    /// Initialise a bare page at `root` (SMALL, no blocks)
    pub fn create<H: BlockHost + ?Sized>(host: &mut H, root: u32) -> Result<Self> {
        Self::init(host.device_mut(), root, &PAGE_LAYOUT)
    }

    /// Load a bare page from `root`, verifying its checksum
    pub fn load<H: BlockHost + ?Sized>(host: &H, root: u32) -> Result<Self> {
        Self::open(host.device(), root, &PAGE_LAYOUT)
    }

    pub(crate) fn init(device: &mut BlockFile, root: u32, layout: &'static Layout) -> Result<Self> {
        device.zero(root)?;
        let page = Self {
            root,
            kind: PageKind::Small,
            num_blocks: 0,
            layout,
            cache: None,
        };
        page.sync_header(device, &[])?;
        Ok(page)
    }

    pub(crate) fn open(device: &BlockFile, root: u32, layout: &'static Layout) -> Result<Self> {
        let block = device.block(root)?;
        Layout::check(block, root)?;
        let kind = PageKind::from_u8(layout.get(block, "type") as u8)?;
        let num_blocks = layout.get(block, "num_blocks") as u32;

        Ok(Self {
            root,
            kind,
            num_blocks,
            layout,
            cache: None,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Materialized data blocks (0 while SMALL)
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn header_size(&self) -> usize {
        self.layout.size()
    }

    /// Bytes available inline in the root block
    pub fn max_small(&self) -> usize {
        BLOCK_SIZE - self.layout.size()
    }

    /// Largest block count the root index can address
    pub fn max_blocks(&self) -> u32 {
        let words = (self.max_small() / 4) as u32;
        ONE_LEVEL + (words - ONE_LEVEL) * INDEX_SIZE
    }

    /// Bytes addressable in the current footprint
    pub fn extent(&self) -> u64 {
        match self.kind {
            PageKind::Small => self.max_small() as u64,
            PageKind::Regular => self.num_blocks as u64 * BLOCK_SIZE as u64,
        }
    }

    /// Bytes addressable in the footprint needed for `bytes`
    pub fn extent_for(&self, bytes: u64) -> Result<u64> {
        if bytes <= self.max_small() as u64 {
            Ok(self.max_small() as u64)
        } else {
            Ok(u64::from(blocks_for(bytes)?) << BLOCK_BITS)
        }
    }

    pub(crate) fn field(&self, device: &BlockFile, name: &str) -> Result<u64> {
        Ok(self.layout.get(device.block(self.root)?, name))
    }

    /// Write page fields plus `extra` into the root and reseal it
    pub(crate) fn sync_header(&self, device: &mut BlockFile, extra: &[(&str, u64)]) -> Result<()> {
        let block = device.block_mut(self.root)?;
        self.layout.set(block, "type", self.kind as u64);
        self.layout.set(block, "num_blocks", self.num_blocks as u64);
        for (name, value) in extra {
            self.layout.set(block, name, *value);
        }
        header::seal(block);
        Ok(())
    }

    // =========================================================================
    // Translation
    // =========================================================================

    /// Translate logical block `i` to a host block index
    pub fn host_index(&mut self, device: &BlockFile, i: u32) -> Result<u32> {
        assert_eq!(
            self.kind,
            PageKind::Regular,
            "page at root {} is not regular",
            self.root
        );
        if i >= self.num_blocks {
            return Err(DbError::OutOfRange {
                index: i as u64,
                len: self.num_blocks as u64,
            });
        }

        if i < ONE_LEVEL {
            return self.index(device, i);
        }

        let cache = self.cache.get_or_insert_with(|| {
            LruCache::new(NonZeroUsize::new(INDEX_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
        });
        if let Some(&block) = cache.get(&i) {
            return Ok(block);
        }

        let table = self.index(device, index0(i))?;
        let block = read_word(device.block(table)?, index1(i));
        if let Some(cache) = self.cache.as_mut() {
            cache.put(i, block);
        }
        Ok(block)
    }

    fn index(&self, device: &BlockFile, slot: u32) -> Result<u32> {
        Ok(read_word(device.block(self.root)?, slot))
    }

    fn set_index(&self, device: &mut BlockFile, slot: u32, block: u32) -> Result<()> {
        write_word(device.block_mut(self.root)?, slot, block);
        Ok(())
    }

    fn invalidate(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    // =========================================================================
    // Block Allocation
    // =========================================================================

    /// Grow or shrink a REGULAR page to exactly `num_blocks` data blocks
    ///
    /// New data blocks are zero-filled. Page-table blocks are allocated on
    /// first use and freed once their first entry is cleared.
    pub fn allocate<H: BlockHost + ?Sized>(&mut self, host: &mut H, num_blocks: u32) -> Result<()> {
        assert_eq!(
            self.kind,
            PageKind::Regular,
            "can only allocate blocks on a regular page (root {})",
            self.root
        );
        if num_blocks > self.max_blocks() {
            return Err(DbError::CapacityExceeded(format!(
                "{} blocks requested, root {} addresses at most {}",
                num_blocks,
                self.root,
                self.max_blocks()
            )));
        }

        self.invalidate();
        let mut cur = self.num_blocks;
        trace!(root = self.root, from = cur, to = num_blocks, "resizing page index");

        // grow one-level data pointers
        while cur < num_blocks && cur < ONE_LEVEL {
            let block = host.allocate()?;
            host.device_mut().zero(block)?;
            self.set_index(host.device_mut(), cur, block)?;
            cur += 1;
            self.num_blocks = cur;
        }

        // grow two-level data pointers
        while cur < num_blocks {
            let (i0, i1) = (index0(cur), index1(cur));

            let mut table = self.index(host.device(), i0)?;
            if table == 0 {
                table = host.allocate()?;
                host.device_mut().zero(table)?;
                self.set_index(host.device_mut(), i0, table)?;
            }

            let block = host.allocate()?;
            host.device_mut().zero(block)?;
            write_word(host.device_mut().block_mut(table)?, i1, block);

            cur += 1;
            self.num_blocks = cur;
        }

        // shrink two-level data pointers
        while cur > num_blocks && cur > ONE_LEVEL {
            let (i0, i1) = (index0(cur - 1), index1(cur - 1));

            let table = self.index(host.device(), i0)?;
            let entries = host.device_mut().block_mut(table)?;
            let block = read_word(entries, i1);
            write_word(entries, i1, 0);
            host.free(block)?;

            if i1 == 0 {
                self.set_index(host.device_mut(), i0, 0)?;
                host.free(table)?;
            }

            cur -= 1;
            self.num_blocks = cur;
        }

        // shrink one-level data pointers
        while cur > num_blocks {
            let block = self.index(host.device(), cur - 1)?;
            self.set_index(host.device_mut(), cur - 1, 0)?;
            host.free(block)?;

            cur -= 1;
            self.num_blocks = cur;
        }

        self.sync_header(host.device_mut(), &[])
    }

    /// Move the single data block's bytes back into the root
    pub fn make_small<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.kind == PageKind::Small {
            return Ok(());
        }
        assert_eq!(
            self.num_blocks, 1,
            "only a page with 1 block can become small (root {})",
            self.root
        );

        let data_len = self.max_small();
        let block = self.host_index(host.device(), 0)?;
        let data = host.device().block(block)?[..data_len].to_vec();

        self.allocate(host, 0)?;
        host.device_mut().block_mut(self.root)?[..data_len].copy_from_slice(&data);
        self.kind = PageKind::Small;

        debug!(root = self.root, freed = block, "page demoted to small");
        self.sync_header(host.device_mut(), &[])
    }

    /// Move the root's inline bytes into a freshly allocated data block
    pub fn make_regular<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.kind == PageKind::Regular {
            return Ok(());
        }

        let data_len = self.max_small();
        let block = host.allocate()?;

        let device = host.device_mut();
        let inline = device.block(self.root)?[..data_len].to_vec();
        let target = device.block_mut(block)?;
        target[..data_len].copy_from_slice(&inline);
        target[data_len..].fill(0);

        let root = device.block_mut(self.root)?;
        root[..data_len].fill(0);
        write_word(root, 0, block);

        self.kind = PageKind::Regular;
        self.num_blocks = 1;
        self.invalidate();

        debug!(root = self.root, block, "page promoted to regular");
        self.sync_header(device, &[])
    }

    /// Fit the footprint to hold `bytes` bytes, preserving what survives
    ///
    /// Bytes beyond the new extent are dropped; the caller zeroes any
    /// truncated range that stays inside it.
    pub(crate) fn reshape<H: BlockHost + ?Sized>(&mut self, host: &mut H, bytes: u64) -> Result<()> {
        if bytes <= self.max_small() as u64 {
            if self.kind == PageKind::Regular {
                if self.num_blocks > 1 {
                    self.allocate(host, 1)?;
                }
                if self.num_blocks == 1 {
                    self.make_small(host)?;
                } else {
                    self.kind = PageKind::Small;
                    self.sync_header(host.device_mut(), &[])?;
                }
            }
            return Ok(());
        }

        let blocks = blocks_for(bytes)?;

        if self.kind == PageKind::Small {
            self.make_regular(host)?;
        }
        if blocks != self.num_blocks {
            self.allocate(host, blocks)?;
        }
        Ok(())
    }

    // =========================================================================
    // Byte Access
    // =========================================================================

    /// Host ranges `(block, offset, len)` covering `[offset, offset + len)`
    fn spans(&mut self, device: &BlockFile, offset: u64, len: usize) -> Result<Vec<(u32, usize, usize)>> {
        let in_range = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.extent());
        if !in_range {
            return Err(DbError::OutOfRange {
                index: offset.saturating_add(len as u64),
                len: self.extent(),
            });
        }

        if self.kind == PageKind::Small {
            return Ok(vec![(self.root, offset as usize, len)]);
        }

        let mut spans = Vec::new();
        let (mut offset, mut remaining) = (offset, len);
        while remaining > 0 {
            let block = (offset >> BLOCK_BITS) as u32;
            let start = (offset & BLOCK_MASK) as usize;
            let take = remaining.min(BLOCK_SIZE - start);
            spans.push((self.host_index(device, block)?, start, take));
            offset += take as u64;
            remaining -= take;
        }
        Ok(spans)
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the page
    pub fn read_at(&mut self, device: &BlockFile, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        for (block, start, len) in self.spans(device, offset, buf.len())? {
            buf[pos..pos + len].copy_from_slice(&device.block(block)?[start..start + len]);
            pos += len;
        }
        Ok(())
    }

    /// Copy `data` into the page starting at `offset`
    pub fn write_at(&mut self, device: &mut BlockFile, offset: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0;
        for (block, start, len) in self.spans(device, offset, data.len())? {
            device.block_mut(block)?[start..start + len].copy_from_slice(&data[pos..pos + len]);
            pos += len;
        }
        self.reseal_inline(device)
    }

    /// Zero `[start, end)`
    pub(crate) fn zero_range(&mut self, device: &mut BlockFile, start: u64, end: u64) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        for (block, offset, len) in self.spans(device, start, (end - start) as usize)? {
            device.block_mut(block)?[offset..offset + len].fill(0);
        }
        self.reseal_inline(device)
    }

    /// Inline data shares the root's checksum
    fn reseal_inline(&self, device: &mut BlockFile) -> Result<()> {
        if self.kind == PageKind::Small {
            header::seal(device.block_mut(self.root)?);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("root", &self.root)
            .field("kind", &self.kind)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}

/// Whole blocks needed for `bytes` bytes
fn blocks_for(bytes: u64) -> Result<u32> {
    bytes
        .checked_add(BLOCK_MASK)
        .and_then(|rounded| u32::try_from(rounded >> BLOCK_BITS).ok())
        .ok_or_else(|| {
            DbError::CapacityExceeded(format!("{} bytes exceed the block address space", bytes))
        })
}

pub(crate) fn read_word(block: &[u8], slot: u32) -> u32 {
    let at = slot as usize * 4;
    u32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]])
}

pub(crate) fn write_word(block: &mut [u8], slot: u32, value: u32) {
    let at = slot as usize * 4;
    block[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
