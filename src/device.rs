//! Block Device
//!
//! A single data file, memory-mapped and addressed in fixed-size blocks.
//!
//! ## Responsibilities
//! - Create/open the data file (block 0 is always present and reserved)
//! - Hand out block-sized slices of the mapping
//! - Grow/shrink the file in whole blocks, remapping as needed
//! - Flush dirty pages of the mapping to disk

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::error::{DbError, Result};

/// Size of one block (the unit of I/O and checksum validation)
pub const BLOCK_SIZE: usize = 4096;

/// Memory-mapped file of fixed-size blocks
pub struct BlockFile {
    file: File,
    map: MmapMut,
    path: PathBuf,
    readonly: bool,
    is_new: bool,
}

impl BlockFile {
    /// Open or create a block file
    ///
    /// A new file (absent, or `overwrite` set) starts with one zero block.
    pub fn open(path: &Path, overwrite: bool, readonly: bool) -> Result<Self> {
        let is_new = overwrite || !path.exists();
        if is_new && readonly {
            return Err(DbError::Config(format!(
                "cannot create {} in read-only mode",
                path.display()
            )));
        }

        let file = if readonly {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(is_new)
                .open(path)?
        };

        if is_new {
            file.set_len(BLOCK_SIZE as u64)?;
        }

        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(DbError::Format(format!(
                "file size {} is not a positive multiple of {}",
                len, BLOCK_SIZE
            )));
        }

        let map = Self::map(&file, readonly)?;

        debug!(
            path = %path.display(),
            blocks = len / BLOCK_SIZE as u64,
            is_new,
            readonly,
            "opened block file"
        );

        Ok(Self {
            file,
            map,
            path: path.to_path_buf(),
            readonly,
            is_new,
        })
    }

    /// Number of blocks in the file
    pub fn len(&self) -> u32 {
        (self.map.len() / BLOCK_SIZE) as u32
    }

    /// Always false: block 0 exists from creation
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Borrow a block's bytes
    pub fn block(&self, index: u32) -> Result<&[u8]> {
        let start = self.offset(index)?;
        Ok(&self.map[start..start + BLOCK_SIZE])
    }

    /// Borrow a block's bytes mutably
    pub fn block_mut(&mut self, index: u32) -> Result<&mut [u8]> {
        if self.readonly {
            return Err(DbError::ReadOnly);
        }
        let start = self.offset(index)?;
        Ok(&mut self.map[start..start + BLOCK_SIZE])
    }

    /// Overwrite a block with zeros
    pub fn zero(&mut self, index: u32) -> Result<()> {
        self.block_mut(index)?.fill(0);
        Ok(())
    }

    /// Resize the file to `num_blocks` blocks
    ///
    /// New blocks read as zeros. Any slice borrowed from the old mapping is
    /// invalidated, which the borrow checker enforces through `&mut self`.
    pub fn resize(&mut self, num_blocks: u32) -> Result<()> {
        if self.readonly {
            return Err(DbError::ReadOnly);
        }
        if num_blocks == 0 {
            return Err(DbError::Config("block file cannot be empty".to_string()));
        }
        self.file.set_len(num_blocks as u64 * BLOCK_SIZE as u64)?;
        self.map = Self::map(&self.file, false)?;
        Ok(())
    }

    /// Append one zero block and return its index
    pub fn grow(&mut self) -> Result<u32> {
        let index = self.len();
        self.resize(index + 1)?;
        debug!(block = index, "grew block file");
        Ok(index)
    }

    /// Flush one block, or the whole mapping when `block` is None
    pub fn flush(&self, block: Option<u32>) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        match block {
            Some(index) => {
                let start = self.offset(index)?;
                self.map.flush_range(start, BLOCK_SIZE)?;
            }
            None => self.map.flush()?,
        }
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file was created by this open
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn offset(&self, index: u32) -> Result<usize> {
        if index >= self.len() {
            return Err(DbError::OutOfRange {
                index: index as u64,
                len: self.len() as u64,
            });
        }
        Ok(index as usize * BLOCK_SIZE)
    }

    fn map(file: &File, readonly: bool) -> Result<MmapMut> {
        // SAFETY: the file handle is owned by this BlockFile and only resized
        // through `resize`, which replaces the mapping right after truncation.
        // A read-only database maps privately so writes never reach the file.
        let map = unsafe {
            if readonly {
                MmapOptions::new().map_copy(file)?
            } else {
                MmapOptions::new().map_mut(file)?
            }
        };
        Ok(map)
    }
}
