//! Linear Hash
//!
//! A persistent map that grows one bucket at a time.
//!
//! ## Growth
//! With level `L` and split cursor `S`, the table holds `N = 2^L + S`
//! buckets. A key with hash `h` goes to `h mod 2^(L+1)` if that bucket
//! exists, else to `h mod 2^L` (both measured in sub-bucket units, so the
//! low 8 bits pick one of 256 sub-buckets). When a bucket reaches
//! `SPLIT_THRESHOLD` bytes, bucket `S` is split into `S` and `S + 2^L` and
//! the cursor advances.
//!
//! ```text
//! N == 1   root blob is the only bucket (inline, SMALL)
//! N >= 2   root is a REGULAR page; logical block i is the root of bucket i
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::LazyLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::allocator::BlockHost;
use crate::blob::Blob;
use crate::bucket::{self, SUB_BUCKETS, SUB_BUCKET_BITS, SUB_BUCKET_MASK};
use crate::device::BlockFile;
use crate::error::{DbError, Result};
use crate::header::{Field, Layout, Width};
use crate::page::{PageKind, PAGE_FIELDS};

/// Bucket size that triggers a split
pub const SPLIT_THRESHOLD: u64 = 3072;

static HASH_LAYOUT: LazyLock<Layout> = LazyLock::new(|| {
    Layout::new(&[
        PAGE_FIELDS[0],
        PAGE_FIELDS[1],
        Field::new("length", Width::U64),
        Field::new("size", Width::U64),
        Field::new("split", Width::U32),
        Field::new("level", Width::U8),
    ])
});

/// Stable 64-bit hash of a key's serialized form
pub fn key_hash<K: Serialize + ?Sized>(key: &K) -> Result<u64> {
    Ok(xxh3_64(&bincode::serialize(key)?))
}

enum Stored<K, V> {
    Done { is_new: bool, bucket_len: u64 },
    /// The inline bucket has no room; split first
    Deferred(K, V),
}

/// Linear-hash map from `K` to `V`
pub struct Hash<K, V> {
    /// The sole bucket while inline, else the index of bucket roots
    root: Blob,
    size: u64,
    split: u32,
    level: u8,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Hash<K, V>
where
    K: Serialize + DeserializeOwned + Ord,
    V: Serialize + DeserializeOwned,
{
    /// Initialise an empty table at `root`
    pub fn create<H: BlockHost + ?Sized>(host: &mut H, root: u32) -> Result<Self> {
        let mut blob = Blob::init(host.device_mut(), root, &HASH_LAYOUT)?;
        bucket::init(&mut blob, host)?;

        let hash = Self {
            root: blob,
            size: 0,
            split: 0,
            level: 0,
            _entries: PhantomData,
        };
        hash.sync_header(host.device_mut())?;
        Ok(hash)
    }

    /// Load a table from `root`, verifying its checksum
    pub fn load<H: BlockHost + ?Sized>(host: &H, root: u32) -> Result<Self> {
        let device = host.device();
        let blob = Blob::open(device, root, &HASH_LAYOUT)?;
        let page = blob.page();

        Ok(Self {
            size: page.field(device, "size")?,
            split: page.field(device, "split")? as u32,
            level: page.field(device, "level")? as u8,
            root: blob,
            _entries: PhantomData,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root(&self) -> u32 {
        self.root.root()
    }

    /// Number of live keys
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn split(&self) -> u32 {
        self.split
    }

    /// Materialized buckets (`2^level + split`)
    pub fn bucket_count(&self) -> u32 {
        match self.root.kind() {
            PageKind::Small => 1,
            PageKind::Regular => self.root.num_blocks(),
        }
    }

    fn is_inline(&self) -> bool {
        self.root.kind() == PageKind::Small
    }

    /// `(bucket, sub-bucket)` currently responsible for `key`
    pub fn bucket_for(&self, key: &K) -> Result<(u32, usize)> {
        let h = key_hash(key)?;
        let level = u32::from(self.level);

        let mut b = h & (((SUB_BUCKETS as u64) << 1 << level) - 1);
        if b >= ((1u64 << level) + u64::from(self.split)) << SUB_BUCKET_BITS {
            // bucket not split yet
            b = h & (((SUB_BUCKETS as u64) << level) - 1);
        }
        Ok(((b >> SUB_BUCKET_BITS) as u32, (b & SUB_BUCKET_MASK) as usize))
    }

    // =========================================================================
    // Map Operations
    // =========================================================================

    /// Value stored under `key`
    pub fn get<H: BlockHost + ?Sized>(&mut self, host: &H, key: &K) -> Result<V> {
        let (index, sub) = self.bucket_for(key)?;
        let mut map: BTreeMap<K, V> =
            self.read_bucket(host, index, |blob| bucket::get_sub(blob, host, sub))?;
        map.remove(key).ok_or(DbError::KeyNotFound)
    }

    pub fn contains_key<H: BlockHost + ?Sized>(&mut self, host: &H, key: &K) -> Result<bool> {
        let (index, sub) = self.bucket_for(key)?;
        let map: BTreeMap<K, V> =
            self.read_bucket(host, index, |blob| bucket::get_sub(blob, host, sub))?;
        Ok(map.contains_key(key))
    }

    /// Insert or replace the value under `key`
    pub fn set<H: BlockHost + ?Sized>(&mut self, host: &mut H, key: K, value: V) -> Result<()> {
        let (index, sub) = self.bucket_for(&key)?;
        let inline_limit = self.is_inline().then(|| self.root.page().max_small() as u64);

        let stored = self.write_bucket(host, index, |blob, host| {
            let map: BTreeMap<K, V> = bucket::get_sub(blob, &*host, sub)?;
            let is_new = !map.contains_key(&key);

            let mut view: BTreeMap<&K, &V> = map.iter().collect();
            view.insert(&key, &value);
            let data = bucket::encode(&view)?;
            drop(view);

            if let Some(limit) = inline_limit {
                let dir = bucket::directory(blob, &*host)?;
                if bucket::required_len(blob.len(), &dir, sub, data.len()) > limit {
                    return Ok(Stored::Deferred(key, value));
                }
            }

            bucket::store(blob, host, sub, &data)?;
            Ok(Stored::Done {
                is_new,
                bucket_len: blob.len(),
            })
        })?;

        match stored {
            Stored::Deferred(key, value) => {
                self.grow(host)?;
                self.set(host, key, value)
            }
            Stored::Done { is_new, bucket_len } => {
                if is_new {
                    self.size += 1;
                }
                self.sync_header(host.device_mut())?;
                if bucket_len >= SPLIT_THRESHOLD {
                    self.grow(host)?;
                }
                Ok(())
            }
        }
    }

    /// Remove `key` and return its value
    pub fn pop<H: BlockHost + ?Sized>(&mut self, host: &mut H, key: &K) -> Result<V> {
        let (index, sub) = self.bucket_for(key)?;

        let value = self.write_bucket(host, index, |blob, host| {
            let mut map: BTreeMap<K, V> = bucket::get_sub(blob, &*host, sub)?;
            let value = map.remove(key).ok_or(DbError::KeyNotFound)?;
            bucket::set_sub(blob, host, sub, &map)?;
            Ok(value)
        })?;

        self.size -= 1;
        self.sync_header(host.device_mut())?;
        Ok(value)
    }

    /// Remove `key`
    pub fn delete<H: BlockHost + ?Sized>(&mut self, host: &mut H, key: &K) -> Result<()> {
        self.pop(host, key).map(|_| ())
    }

    /// Every entry, bucket by bucket
    pub fn items<H: BlockHost + ?Sized>(&mut self, host: &H) -> Result<Vec<(K, V)>> {
        let mut items = Vec::with_capacity(self.size as usize);
        for index in 0..self.bucket_count() {
            let entries: Vec<(K, V)> =
                self.read_bucket(host, index, |blob| bucket::items(blob, host))?;
            items.extend(entries);
        }
        Ok(items)
    }

    // =========================================================================
    // Growth
    // =========================================================================

    /// Split bucket `split` into `split` and `split + 2^level`
    pub fn grow<H: BlockHost + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        let split = self.split;
        let half = 1u32 << self.level;

        let (entries, mut low) = if self.is_inline() {
            // the root stops being a bucket and becomes the bucket index
            let entries: Vec<(K, V)> = bucket::items(&mut self.root, &*host)?;
            let page = self.root.page_mut();
            page.make_regular(host)?;
            page.allocate(host, 2)?;
            let low_root = page.host_index(host.device(), 0)?;
            self.root.clear_length();

            let mut low = Blob::create(host, low_root)?;
            bucket::init(&mut low, host)?;
            (entries, low)
        } else {
            let page = self.root.page_mut();
            let n = page.num_blocks();
            page.allocate(host, n + 1)?;
            let low_root = page.host_index(host.device(), split)?;

            let mut low = Blob::load(&*host, low_root)?;
            let entries: Vec<(K, V)> = bucket::items(&mut low, &*host)?;
            bucket::init(&mut low, host)?;
            (entries, low)
        };

        let high_root = self.root.page_mut().host_index(host.device(), split + half)?;
        let mut high = Blob::create(host, high_root)?;
        bucket::init(&mut high, host)?;

        // rehash with one more bit
        let mask = ((SUB_BUCKETS as u64) << 1 << self.level) - 1;
        let mut halves: [BTreeMap<usize, BTreeMap<K, V>>; 2] = [BTreeMap::new(), BTreeMap::new()];
        let moved = entries.len();
        for (key, value) in entries {
            let b = key_hash(&key)? & mask;
            let (index, sub) = ((b >> SUB_BUCKET_BITS) as u32, (b & SUB_BUCKET_MASK) as usize);
            let side = if index == split {
                0
            } else if index == split + half {
                1
            } else {
                return Err(DbError::Format(format!(
                    "key in bucket {} rehashed to bucket {}",
                    split, index
                )));
            };
            halves[side].entry(sub).or_default().insert(key, value);
        }

        let [low_subs, high_subs] = halves;
        for (sub, map) in low_subs {
            bucket::set_sub(&mut low, host, sub, &map)?;
        }
        for (sub, map) in high_subs {
            bucket::set_sub(&mut high, host, sub, &map)?;
        }

        if split + 1 == half {
            self.level += 1;
            self.split = 0;
        } else {
            self.split += 1;
        }

        debug!(
            root = self.root(),
            bucket = split,
            new_bucket = split + half,
            entries = moved,
            level = self.level,
            split = self.split,
            "hash bucket split"
        );
        self.sync_header(host.device_mut())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_bucket<H, R, F>(&mut self, host: &H, index: u32, f: F) -> Result<R>
    where
        H: BlockHost + ?Sized,
        F: FnOnce(&mut Blob) -> Result<R>,
    {
        if self.is_inline() {
            return f(&mut self.root);
        }
        let root = self.root.page_mut().host_index(host.device(), index)?;
        let mut blob = Blob::load(host, root)?;
        f(&mut blob)
    }

    fn write_bucket<H, R, F>(&mut self, host: &mut H, index: u32, f: F) -> Result<R>
    where
        H: BlockHost + ?Sized,
        F: FnOnce(&mut Blob, &mut H) -> Result<R>,
    {
        if self.is_inline() {
            return f(&mut self.root, host);
        }
        let root = self.root.page_mut().host_index(host.device(), index)?;
        let mut blob = Blob::load(&*host, root)?;
        f(&mut blob, host)
    }

    fn sync_header(&self, device: &mut BlockFile) -> Result<()> {
        self.root.page().sync_header(
            device,
            &[
                ("length", self.root.len()),
                ("size", self.size),
                ("split", self.split as u64),
                ("level", self.level as u64),
            ],
        )
    }
}

impl<K, V> std::fmt::Debug for Hash<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hash")
            .field("root", &self.root.root())
            .field("size", &self.size)
            .field("level", &self.level)
            .field("split", &self.split)
            .finish()
    }
}
