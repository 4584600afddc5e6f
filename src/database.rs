//! Database Module
//!
//! Owns the block file and the free list, and creates the objects stored in
//! it.
//!
//! ## Responsibilities
//! - Open/create the data file and its free list (block 1)
//! - Allocate and free blocks for every object
//! - Create new blobs, arrays, hashes and bare pages at fresh roots
//! - Flush the mapping on commit/close

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::allocator::{BlockHost, FreeList, FREELIST_ROOT};
use crate::array::{Array, Item};
use crate::blob::Blob;
use crate::config::Config;
use crate::device::{BlockFile, BLOCK_SIZE};
use crate::error::{DbError, Result};
use crate::hash::Hash;
use crate::page::Page;

/// An open block database
///
/// ## Ownership
///
/// Objects (`Blob`, `Array`, `Hash`, `Page`) are plain handles over a root
/// block. They hold no reference to the database; every operation takes the
/// database as its `BlockHost`. One handle per root at a time.
pub struct Database {
    /// Database configuration
    config: Config,

    /// Memory-mapped data file
    device: BlockFile,

    /// Self-hosted free list rooted at block 1
    freelist: FreeList,
}

impl Database {
    /// Open or create a database with the given config
    ///
    /// A new file gets block 0 (reserved) and the free list at block 1.
    pub fn open(config: Config) -> Result<Self> {
        if config.readonly && config.overwrite {
            return Err(DbError::Config(
                "overwrite and readonly are mutually exclusive".to_string(),
            ));
        }

        let mut device = BlockFile::open(&config.path, config.overwrite, config.readonly)?;
        let freelist = if device.is_new() {
            FreeList::create(&mut device)?
        } else {
            FreeList::load(&device)?
        };

        info!(
            path = %config.path.display(),
            blocks = device.len(),
            free = freelist.len(),
            readonly = config.readonly,
            "database opened"
        );

        Ok(Self {
            config,
            device,
            freelist,
        })
    }

    /// Open with default settings at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder().path(path.as_ref()).build();
        Self::open(config)
    }

    // =========================================================================
    // Block Allocation
    // =========================================================================

    /// Obtain an unused block, reusing the most recently freed one
    pub fn allocate(&mut self) -> Result<u32> {
        if self.device.is_readonly() {
            return Err(DbError::ReadOnly);
        }
        self.freelist.allocate(&mut self.device)
    }

    /// Return `block` for reuse
    pub fn free(&mut self, block: u32) -> Result<()> {
        if self.device.is_readonly() {
            return Err(DbError::ReadOnly);
        }
        if block <= FREELIST_ROOT {
            return Err(DbError::Config(format!("block {} is reserved", block)));
        }
        if block >= self.device.len() {
            return Err(DbError::OutOfRange {
                index: block as u64,
                len: self.device.len() as u64,
            });
        }
        self.freelist.free(&mut self.device, block)
    }

    /// Blocks in the data file
    pub fn block_count(&self) -> u32 {
        self.device.len()
    }

    /// Blocks waiting on the free list
    pub fn free_count(&self) -> u64 {
        self.freelist.len()
    }

    pub fn freelist(&self) -> &FreeList {
        &self.freelist
    }

    /// Free block indices, oldest first
    pub fn free_blocks(&mut self) -> Result<Vec<u32>> {
        self.freelist.entries(&self.device)
    }

    // =========================================================================
    // Raw Blocks
    // =========================================================================

    pub fn read_block(&self, block: u32) -> Result<&[u8]> {
        self.device.block(block)
    }

    /// Overwrite a whole block
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(DbError::OutOfRange {
                index: data.len() as u64,
                len: BLOCK_SIZE as u64,
            });
        }
        self.device.block_mut(block)?.copy_from_slice(data);
        Ok(())
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Bare page at a fresh root
    pub fn page(&mut self) -> Result<Page> {
        let root = self.allocate()?;
        Page::create(self, root)
    }

    /// Empty blob at a fresh root
    pub fn blob(&mut self) -> Result<Blob> {
        let root = self.allocate()?;
        Blob::create(self, root)
    }

    /// Empty array of `T` at a fresh root
    pub fn array<T: Item>(&mut self) -> Result<Array<T>> {
        let root = self.allocate()?;
        Array::create(self, root)
    }

    /// Empty hash at a fresh root
    pub fn hash<K, V>(&mut self) -> Result<Hash<K, V>>
    where
        K: Serialize + DeserializeOwned + Ord,
        V: Serialize + DeserializeOwned,
    {
        let root = self.allocate()?;
        Hash::create(self, root)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Make all changes durable
    pub fn commit(&mut self) -> Result<()> {
        if self.config.sync_on_commit {
            self.device.flush(None)?;
        }
        debug!(blocks = self.device.len(), "commit");
        Ok(())
    }

    /// Discard changes since the last commit (not available in this store)
    pub fn rollback(&mut self) -> Result<()> {
        Err(DbError::Unsupported("rollback"))
    }

    /// Flush and close
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        info!(
            path = %self.config.path.display(),
            blocks = self.device.len(),
            free = self.freelist.len(),
            "database closed"
        );
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.device.path()
    }

    pub fn is_readonly(&self) -> bool {
        self.device.is_readonly()
    }
}

impl BlockHost for Database {
    fn device(&self) -> &BlockFile {
        &self.device
    }

    fn device_mut(&mut self) -> &mut BlockFile {
        &mut self.device
    }

    fn allocate(&mut self) -> Result<u32> {
        Database::allocate(self)
    }

    fn free(&mut self, block: u32) -> Result<()> {
        Database::free(self, block)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.path)
            .field("blocks", &self.device.len())
            .field("free", &self.freelist.len())
            .finish()
    }
}
