//! Blob
//!
//! A variable-length byte string stored in a page. Up to `max_small` bytes
//! live inline in the root block; larger blobs spill into data blocks.

use std::sync::LazyLock;

use tracing::trace;

use crate::allocator::BlockHost;
use crate::device::BlockFile;
use crate::error::{DbError, Result};
use crate::header::{Field, Layout, Width};
use crate::page::{Page, PageKind, PAGE_FIELDS};

static BLOB_LAYOUT: LazyLock<Layout> = LazyLock::new(|| {
    Layout::new(&[
        PAGE_FIELDS[0],
        PAGE_FIELDS[1],
        Field::new("length", Width::U64),
    ])
});

/// Page-backed byte string
pub struct Blob {
    page: Page,
    length: u64,
}

impl Blob {
    /// Initialise an empty blob at `root`
    pub fn create<H: BlockHost + ?Sized>(host: &mut H, root: u32) -> Result<Self> {
        Self::init(host.device_mut(), root, &BLOB_LAYOUT)
    }

    /// Load a blob from `root`, verifying its checksum
    pub fn load<H: BlockHost + ?Sized>(host: &H, root: u32) -> Result<Self> {
        Self::open(host.device(), root, &BLOB_LAYOUT)
    }

    /// Blob over a layout that extends the blob fields
    pub(crate) fn init(device: &mut BlockFile, root: u32, layout: &'static Layout) -> Result<Self> {
        let blob = Self {
            page: Page::init(device, root, layout)?,
            length: 0,
        };
        blob.sync_header(device)?;
        Ok(blob)
    }

    pub(crate) fn open(device: &BlockFile, root: u32, layout: &'static Layout) -> Result<Self> {
        let page = Page::open(device, root, layout)?;
        let length = page.field(device, "length")?;
        Ok(Self { page, length })
    }

    pub fn root(&self) -> u32 {
        self.page.root()
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn kind(&self) -> PageKind {
        self.page.kind()
    }

    pub fn num_blocks(&self) -> u32 {
        self.page.num_blocks()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub(crate) fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    /// `len` bytes starting at `offset`
    pub fn read<H: BlockHost + ?Sized>(&mut self, host: &H, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check(offset, len)?;
        let mut buf = vec![0u8; len];
        self.page.read_at(host.device(), offset, &mut buf)?;
        Ok(buf)
    }

    /// The whole blob
    pub fn read_all<H: BlockHost + ?Sized>(&mut self, host: &H) -> Result<Vec<u8>> {
        let len = usize::try_from(self.length)
            .map_err(|_| DbError::CapacityExceeded(format!("blob of {} bytes", self.length)))?;
        self.read(host, 0, len)
    }

    /// Overwrite bytes inside `[0, len)`; never changes the length
    pub fn write<H: BlockHost + ?Sized>(&mut self, host: &mut H, offset: u64, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        self.page.write_at(host.device_mut(), offset, data)
    }

    /// Replace the contents with `data`
    pub fn set_data<H: BlockHost + ?Sized>(&mut self, host: &mut H, data: &[u8]) -> Result<()> {
        self.resize(host, data.len() as u64)?;
        self.write(host, 0, data)
    }

    /// Change the length, keeping the common prefix
    ///
    /// Growth exposes zero bytes; truncated bytes are zeroed before the
    /// footprint shrinks.
    pub fn resize<H: BlockHost + ?Sized>(&mut self, host: &mut H, length: u64) -> Result<()> {
        if length == self.length {
            return Ok(());
        }
        if length < self.length {
            let end = self.length.min(self.page.extent_for(length)?);
            self.page.zero_range(host.device_mut(), length, end)?;
        }
        self.page.reshape(host, length)?;

        trace!(root = self.root(), from = self.length, to = length, "blob resized");
        self.length = length;
        self.sync_header(host.device_mut())
    }

    /// Forget the byte length once the root holds something other than bytes
    pub(crate) fn clear_length(&mut self) {
        self.length = 0;
    }

    pub(crate) fn sync_header(&self, device: &mut BlockFile) -> Result<()> {
        self.page.sync_header(device, &[("length", self.length)])
    }

    fn check(&self, offset: u64, len: usize) -> Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(DbError::OutOfRange {
                index: offset.saturating_add(len as u64),
                len: self.length,
            }),
        }
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("root", &self.root())
            .field("kind", &self.kind())
            .field("length", &self.length)
            .finish()
    }
}
