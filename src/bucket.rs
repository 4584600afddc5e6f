//! Hash Bucket
//!
//! One bucket of a linear hash: a blob holding 256 serialized sub-buckets.
//!
//! ## Bucket Layout
//! ```text
//! ┌────────────────────────────────────┬──────────────┬─────┬──────────────┐
//! │ directory: 256 x (u16 off, u16 len)│ sub-bucket a │ ... │ sub-bucket z │
//! │ little-endian, 1024 bytes          │ slot 2^k     │     │ slot 2^k     │
//! └────────────────────────────────────┴──────────────┴─────┴──────────────┘
//! ```
//!
//! A sub-bucket is a sorted map encoded with bincode. Each occupies a slot
//! of `next_power_of_two(len)` bytes, so small edits rewrite in place and a
//! relocated sub-bucket takes the first gap that fits. Offset 0 marks an
//! empty sub-bucket (the directory itself sits at offset 0).

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::allocator::BlockHost;
use crate::blob::Blob;
use crate::error::{DbError, Result};

pub const SUB_BUCKET_BITS: u32 = 8;
pub const SUB_BUCKETS: usize = 1 << SUB_BUCKET_BITS;
pub const SUB_BUCKET_MASK: u64 = SUB_BUCKETS as u64 - 1;

/// Bytes reserved for the directory at the head of every bucket
pub const DIRECTORY_SIZE: usize = SUB_BUCKETS * 4;

/// Largest bucket addressable by u16 directory offsets
const MAX_BUCKET_SIZE: usize = u16::MAX as usize;

/// Directory entry: `(offset, length)` of one sub-bucket
pub(crate) type Entry = (u16, u16);

/// Reset `bucket` to an empty directory
pub(crate) fn init<H: BlockHost + ?Sized>(bucket: &mut Blob, host: &mut H) -> Result<()> {
    bucket.resize(host, 0)?;
    bucket.resize(host, DIRECTORY_SIZE as u64)
}

pub(crate) fn directory<H: BlockHost + ?Sized>(bucket: &mut Blob, host: &H) -> Result<Vec<Entry>> {
    let raw = bucket.read(host, 0, DIRECTORY_SIZE)?;
    Ok(raw
        .chunks_exact(4)
        .map(|e| (u16::from_le_bytes([e[0], e[1]]), u16::from_le_bytes([e[2], e[3]])))
        .collect())
}

fn write_entry<H: BlockHost + ?Sized>(bucket: &mut Blob, host: &mut H, sub: usize, entry: Entry) -> Result<()> {
    let mut raw = [0u8; 4];
    raw[..2].copy_from_slice(&entry.0.to_le_bytes());
    raw[2..].copy_from_slice(&entry.1.to_le_bytes());
    bucket.write(host, (sub * 4) as u64, &raw)
}

/// Decode sub-bucket `sub`; empty when unused
pub(crate) fn get_sub<K, V, H>(bucket: &mut Blob, host: &H, sub: usize) -> Result<BTreeMap<K, V>>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned,
    H: BlockHost + ?Sized,
{
    let (offset, len) = directory(bucket, host)?[sub];
    decode_at(bucket, host, offset, len)
}

fn decode_at<K, V, H>(bucket: &mut Blob, host: &H, offset: u16, len: u16) -> Result<BTreeMap<K, V>>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned,
    H: BlockHost + ?Sized,
{
    if offset == 0 {
        return Ok(BTreeMap::new());
    }
    let raw = bucket.read(host, offset as u64, len as usize)?;
    Ok(bincode::deserialize(&raw)?)
}

pub(crate) fn encode<K: Serialize, V: Serialize>(map: &BTreeMap<K, V>) -> Result<Vec<u8>> {
    if map.is_empty() {
        return Ok(Vec::new());
    }
    Ok(bincode::serialize(map)?)
}

/// Store `map` as sub-bucket `sub`; an empty map clears the entry
pub(crate) fn set_sub<K, V, H>(bucket: &mut Blob, host: &mut H, sub: usize, map: &BTreeMap<K, V>) -> Result<()>
where
    K: Serialize,
    V: Serialize,
    H: BlockHost + ?Sized,
{
    let data = encode(map)?;
    store(bucket, host, sub, &data)
}

/// Store pre-encoded sub-bucket bytes
pub(crate) fn store<H: BlockHost + ?Sized>(bucket: &mut Blob, host: &mut H, sub: usize, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return write_entry(bucket, host, sub, (0, 0));
    }

    let dir = directory(bucket, &*host)?;
    let offset = placement(&dir, sub, data.len());
    let end = offset + data.len().next_power_of_two();
    if end > MAX_BUCKET_SIZE || data.len() > MAX_BUCKET_SIZE {
        return Err(DbError::CapacityExceeded(format!(
            "sub-bucket {} of {} bytes does not fit a bucket of {} bytes",
            sub,
            data.len(),
            MAX_BUCKET_SIZE
        )));
    }

    if end as u64 > bucket.len() && !fits_in_place(&dir[sub], data.len()) {
        bucket.resize(host, end as u64)?;
    }
    bucket.write(host, offset as u64, data)?;
    write_entry(bucket, host, sub, (offset as u16, data.len() as u16))
}

/// Bucket length after storing `len` bytes as sub-bucket `sub`
pub(crate) fn required_len(bucket_len: u64, dir: &[Entry], sub: usize, len: usize) -> u64 {
    if len == 0 || fits_in_place(&dir[sub], len) {
        return bucket_len;
    }
    let end = placement(dir, sub, len) + len.next_power_of_two();
    bucket_len.max(end as u64)
}

fn fits_in_place(entry: &Entry, len: usize) -> bool {
    let (offset, old) = *entry;
    offset != 0 && len <= (old as usize).next_power_of_two()
}

/// Offset for `len` bytes of sub-bucket `sub`
///
/// The current slot when the data still fits it, else the first gap after
/// the directory that holds `next_power_of_two(len)` bytes, else the end.
pub(crate) fn placement(dir: &[Entry], sub: usize, len: usize) -> usize {
    if fits_in_place(&dir[sub], len) {
        return dir[sub].0 as usize;
    }

    let size = len.next_power_of_two();
    let mut slots: Vec<(usize, usize)> = dir
        .iter()
        .enumerate()
        .filter(|&(i, &(offset, _))| i != sub && offset != 0)
        .map(|(_, &(offset, len))| (offset as usize, (len as usize).next_power_of_two()))
        .collect();
    slots.sort_unstable();

    let mut offset = DIRECTORY_SIZE;
    for (start, span) in slots {
        if offset + size <= start {
            break;
        }
        offset = offset.max(start + span);
    }
    offset
}

/// Every entry stored in the bucket
pub(crate) fn items<K, V, H>(bucket: &mut Blob, host: &H) -> Result<Vec<(K, V)>>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned,
    H: BlockHost + ?Sized,
{
    let mut items = Vec::new();
    for (offset, len) in directory(bucket, host)? {
        let map: BTreeMap<K, V> = decode_at(bucket, host, offset, len)?;
        items.extend(map);
    }
    Ok(items)
}
