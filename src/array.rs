//! Fixed-Width Array
//!
//! A growable sequence of fixed-size numeric items stored in a page.
//!
//! ## Capacity Hysteresis
//! An array always keeps one spare slot: `append` grows the footprint by one
//! unit (SMALL -> 1 block, or one more block) as soon as `capacity < len + 1`.
//! `pop` shrinks by one unit only when the smaller footprint would still hold
//! `len + 2` items, so alternating append/pop at a boundary never thrashes.
//!
//! ```text
//! u32 items, 18-byte header:
//!   SMALL      capacity 1019    (4078 / 4)
//!   1 block    capacity 1024
//!   n blocks   capacity n * 1024
//! ```

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::LazyLock;

use tracing::trace;

use crate::allocator::BlockHost;
use crate::device::{BlockFile, BLOCK_SIZE};
use crate::error::{DbError, Result};
use crate::header::{Field, Layout, Width};
use crate::page::{Page, PageKind, PAGE_FIELDS};

static ARRAY_LAYOUT: LazyLock<Layout> = LazyLock::new(|| {
    Layout::new(&[
        PAGE_FIELDS[0],
        PAGE_FIELDS[1],
        Field::new("length", Width::U64),
        Field::new("item_format", Width::U8),
    ])
});

/// A fixed-width item stored little-endian
pub trait Item: Copy {
    /// Format code recorded in the array header
    const FORMAT: u8;
    const SIZE: usize;

    fn decode(bytes: &[u8]) -> Self;

    fn encode(self, out: &mut [u8]);
}

macro_rules! impl_item {
    ($($ty:ty => $format:literal),* $(,)?) => {
        $(
            impl Item for $ty {
                const FORMAT: u8 = $format;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                fn encode(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_item! {
    u8 => b'B',
    u16 => b'H',
    u32 => b'I',
    u64 => b'Q',
    i8 => b'b',
    i16 => b'h',
    i32 => b'i',
    i64 => b'q',
    f32 => b'f',
    f64 => b'd',
}

/// Page-backed array of `T`
pub struct Array<T: Item> {
    page: Page,
    length: u64,
    _item: PhantomData<T>,
}

impl<T: Item> Array<T> {
    /// Initialise an empty array at `root`
    pub fn create<H: BlockHost + ?Sized>(host: &mut H, root: u32) -> Result<Self> {
        Self::init(host.device_mut(), root)
    }

    /// Load an array from `root`, checking its item format
    pub fn load<H: BlockHost + ?Sized>(host: &H, root: u32) -> Result<Self> {
        Self::open(host.device(), root)
    }

    pub(crate) fn init(device: &mut BlockFile, root: u32) -> Result<Self> {
        let array = Self {
            page: Page::init(device, root, &ARRAY_LAYOUT)?,
            length: 0,
            _item: PhantomData,
        };
        array.sync_header(device)?;
        Ok(array)
    }

    pub(crate) fn open(device: &BlockFile, root: u32) -> Result<Self> {
        let page = Page::open(device, root, &ARRAY_LAYOUT)?;
        let format = page.field(device, "item_format")? as u8;
        if format != T::FORMAT {
            return Err(DbError::Format(format!(
                "array at root {} holds items of format {:?}, expected {:?}",
                root, format as char, T::FORMAT as char
            )));
        }
        let length = page.field(device, "length")?;

        Ok(Self {
            page,
            length,
            _item: PhantomData,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

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

    /// Items the current footprint can hold
    pub fn capacity(&self) -> u64 {
        match self.page.kind() {
            PageKind::Small => (self.page.max_small() / T::SIZE) as u64,
            PageKind::Regular => self.page.num_blocks() as u64 * Self::per_block(),
        }
    }

    fn per_block() -> u64 {
        (BLOCK_SIZE / T::SIZE) as u64
    }

    // =========================================================================
    // Element Access
    // =========================================================================

    /// Item at `index`
    pub fn get<H: BlockHost + ?Sized>(&mut self, host: &H, index: u64) -> Result<T> {
        self.check(index)?;
        self.read(host.device(), index)
    }

    /// Overwrite the item at `index`
    pub fn set<H: BlockHost + ?Sized>(&mut self, host: &mut H, index: u64, value: T) -> Result<()> {
        self.check(index)?;
        self.write(host.device_mut(), index, value)
    }

    /// Last item, if any
    pub fn last<H: BlockHost + ?Sized>(&mut self, host: &H) -> Result<Option<T>> {
        match self.length {
            0 => Ok(None),
            n => self.read(host.device(), n - 1).map(Some),
        }
    }

    /// Items in order
    pub fn iter<'a, H: BlockHost + ?Sized>(&'a mut self, host: &'a H) -> impl Iterator<Item = Result<T>> + 'a {
        let device = host.device();
        (0..self.length).map(move |i| self.read(device, i))
    }

    /// All items in order
    pub fn to_vec<H: BlockHost + ?Sized>(&mut self, host: &H) -> Result<Vec<T>> {
        self.iter(host).collect()
    }

    /// Append one item, growing when the spare slot is used up
    pub fn append<H: BlockHost + ?Sized>(&mut self, host: &mut H, value: T) -> Result<()> {
        self.push_within(host.device_mut(), value)?;
        if self.capacity() < self.length + 1 {
            self.grow_unit(host)?;
        }
        Ok(())
    }

    /// Remove and return the last item
    pub fn pop<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<T> {
        if self.length == 0 {
            return Err(DbError::OutOfRange { index: 0, len: 0 });
        }
        let value = self.pop_within(host.device_mut())?;
        if let Some(shrunk) = self.shrunk_capacity() {
            if shrunk >= self.length + 2 {
                self.shrink_unit(host)?;
            }
        }
        Ok(value)
    }

    /// Set the length to `count`, fitting the footprint to `count + 1` items
    ///
    /// New items read as zero; dropped items are zeroed.
    pub fn resize<H: BlockHost + ?Sized>(&mut self, host: &mut H, count: u64) -> Result<()> {
        let size = T::SIZE as u64;
        let footprint = count
            .checked_add(1)
            .and_then(|n| n.checked_mul(size))
            .ok_or_else(|| DbError::CapacityExceeded(format!("{} items of {} bytes", count, size)))?;

        if count < self.length {
            let end = (self.length * size).min(self.page.extent_for(footprint)?);
            self.page.zero_range(host.device_mut(), count * size, end)?;
        }
        self.page.reshape(host, footprint)?;
        self.length = count;

        trace!(root = self.root(), length = count, "array resized");
        self.sync_header(host.device_mut())
    }

    pub fn get_slice<H: BlockHost + ?Sized>(&mut self, _host: &H, _range: Range<u64>) -> Result<Vec<T>> {
        Err(DbError::Unsupported("array slice reads"))
    }

    pub fn set_slice<H: BlockHost + ?Sized>(&mut self, _host: &mut H, _start: u64, _values: &[T]) -> Result<()> {
        Err(DbError::Unsupported("array slice writes"))
    }

    pub fn extend<H: BlockHost + ?Sized>(&mut self, _host: &mut H, _values: &[T]) -> Result<()> {
        Err(DbError::Unsupported("array bulk extend"))
    }

    // =========================================================================
    // Storage Units
    // =========================================================================

    /// Write at `len` without growing; the spare slot must exist
    pub(crate) fn push_within(&mut self, device: &mut BlockFile, value: T) -> Result<()> {
        debug_assert!(self.capacity() > self.length);
        self.write(device, self.length, value)?;
        self.length += 1;
        self.sync_header(device)
    }

    /// Remove the last item without shrinking
    pub(crate) fn pop_within(&mut self, device: &mut BlockFile) -> Result<T> {
        let index = self.length - 1;
        let value = self.read(device, index)?;
        self.page.zero_range(device, index * T::SIZE as u64, self.length * T::SIZE as u64)?;
        self.length = index;
        self.sync_header(device)?;
        Ok(value)
    }

    /// Add one storage unit: SMALL becomes one block, else one more block
    pub(crate) fn grow_unit<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        match self.page.kind() {
            PageKind::Small => self.page.make_regular(host)?,
            PageKind::Regular => {
                let n = self.page.num_blocks();
                self.page.allocate(host, n + 1)?;
            }
        }
        self.sync_header(host.device_mut())
    }

    /// Drop the last storage unit: one block becomes SMALL, else one block less
    pub(crate) fn shrink_unit<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        match self.page.num_blocks() {
            0 => return Ok(()),
            1 => self.page.make_small(host)?,
            n => self.page.allocate(host, n - 1)?,
        }
        self.sync_header(host.device_mut())
    }

    /// Capacity after `shrink_unit`, or None while SMALL
    pub(crate) fn shrunk_capacity(&self) -> Option<u64> {
        match (self.page.kind(), self.page.num_blocks()) {
            (PageKind::Small, _) => None,
            (PageKind::Regular, 0) => None,
            (PageKind::Regular, 1) => Some((self.page.max_small() / T::SIZE) as u64),
            (PageKind::Regular, n) => Some((n as u64 - 1) * Self::per_block()),
        }
    }

    pub(crate) fn read(&mut self, device: &BlockFile, index: u64) -> Result<T> {
        let mut raw = [0u8; 8];
        self.page.read_at(device, index * T::SIZE as u64, &mut raw[..T::SIZE])?;
        Ok(T::decode(&raw))
    }

    fn write(&mut self, device: &mut BlockFile, index: u64, value: T) -> Result<()> {
        let mut raw = [0u8; 8];
        value.encode(&mut raw);
        self.page.write_at(device, index * T::SIZE as u64, &raw[..T::SIZE])
    }

    fn check(&self, index: u64) -> Result<()> {
        if index >= self.length {
            return Err(DbError::OutOfRange {
                index,
                len: self.length,
            });
        }
        Ok(())
    }

    fn sync_header(&self, device: &mut BlockFile) -> Result<()> {
        self.page.sync_header(
            device,
            &[("length", self.length), ("item_format", T::FORMAT as u64)],
        )
    }
}

impl<T: Item> std::fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("root", &self.root())
            .field("format", &(T::FORMAT as char))
            .field("length", &self.length)
            .field("capacity", &self.capacity())
            .finish()
    }
}
