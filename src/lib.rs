//! # everdb
//!
//! An embedded block storage engine with:
//! - Checksummed fixed-size blocks in a single memory-mapped file
//! - Indexed pages that keep small objects inline and index large ones
//! - Blobs, typed arrays and a linear-hash map built on those pages
//! - A self-hosted free list for block reuse
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Database                             │
//! │              (owns BlockFile + FreeList)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ BlockHost
//!          ┌────────────┼─────────────┬──────────────┐
//!          ▼            ▼             ▼              ▼
//!   ┌────────────┐ ┌──────────┐ ┌───────────┐ ┌────────────┐
//!   │    Blob    │ │ Array<T> │ │ Hash<K,V> │ │  FreeList  │
//!   │  (bytes)   │ │ (items)  │ │ (buckets) │ │ (Array<u32>│
//!   └─────┬──────┘ └────┬─────┘ └─────┬─────┘ └─────┬──────┘
//!         └─────────────┴──────┬──────┴─────────────┘
//!                              ▼
//!                      ┌──────────────┐
//!                      │     Page     │
//!                      │ SMALL/REGULAR│
//!                      └──────┬───────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │  BlockFile   │
//!                      │   (mmap)     │
//!                      └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use everdb::{Config, Database};
//!
//! # fn main() -> everdb::Result<()> {
//! let mut db = Database::open(Config::builder().path("data.db").build())?;
//!
//! let mut names = db.hash::<String, String>()?;
//! names.set(&mut db, "ada".to_string(), "lovelace".to_string())?;
//! assert_eq!(names.get(&db, &"ada".to_string())?, "lovelace");
//!
//! db.close()
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod header;
pub mod device;
pub mod page;
pub mod allocator;
pub mod blob;
pub mod array;
pub mod bucket;
pub mod hash;
pub mod database;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DbError, Result};
pub use config::Config;
pub use allocator::BlockHost;
pub use array::{Array, Item};
pub use blob::Blob;
pub use database::Database;
pub use hash::Hash;
pub use page::{Page, PageKind};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of everdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
