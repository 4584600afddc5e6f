//! Tests for Blob
//!
//! These tests verify:
//! - Inline and spilled storage
//! - Resize preserves the common prefix and zeroes what it exposes
//! - Bounds checks on read/write
//! - Persistence across reopen

use everdb::device::BLOCK_SIZE;
use everdb::{Blob, Database, DbError, PageKind};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_path(temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Inline bytes of a blob root (17-byte header)
const MAX_SMALL: usize = BLOCK_SIZE - 17;

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_blob_is_empty() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();

    assert!(blob.is_empty());
    assert_eq!(blob.kind(), PageKind::Small);
    assert_eq!(blob.read_all(&db).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_small_set_data_and_read() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();

    blob.set_data(&mut db, b"the quick brown fox").unwrap();

    assert_eq!(blob.len(), 19);
    assert_eq!(blob.kind(), PageKind::Small);
    assert_eq!(blob.read(&db, 4, 5).unwrap(), b"quick");
    assert_eq!(blob.read_all(&db).unwrap(), b"the quick brown fox");
}

#[test]
fn test_largest_inline_blob_stays_small() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();

    blob.set_data(&mut db, &pattern(MAX_SMALL)).unwrap();
    assert_eq!(blob.kind(), PageKind::Small);

    blob.resize(&mut db, MAX_SMALL as u64 + 1).unwrap();
    assert_eq!(blob.kind(), PageKind::Regular);
    assert_eq!(blob.num_blocks(), 1);
}

#[test]
fn test_large_blob_spills_into_blocks() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    let data = pattern(10_000);

    blob.set_data(&mut db, &data).unwrap();

    assert_eq!(blob.kind(), PageKind::Regular);
    assert_eq!(blob.num_blocks(), 3);
    assert_eq!(blob.read_all(&db).unwrap(), data);
    assert_eq!(blob.read(&db, 4090, 20).unwrap(), &data[4090..4110]);
}

// =============================================================================
// Resize Tests
// =============================================================================

#[test]
fn test_grow_preserves_prefix_and_exposes_zeros() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"prefix").unwrap();

    blob.resize(&mut db, 9000).unwrap();

    let all = blob.read_all(&db).unwrap();
    assert_eq!(&all[..6], b"prefix");
    assert!(all[6..].iter().all(|&b| b == 0));
}

#[test]
fn test_shrink_to_small_frees_blocks() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    let data = pattern(3 * BLOCK_SIZE);
    blob.set_data(&mut db, &data).unwrap();
    assert_eq!(blob.num_blocks(), 3);

    blob.resize(&mut db, 100).unwrap();

    assert_eq!(blob.kind(), PageKind::Small);
    assert_eq!(blob.num_blocks(), 0);
    assert_eq!(db.free_count(), 3);
    assert_eq!(blob.read_all(&db).unwrap(), &data[..100]);
}

#[test]
fn test_truncate_then_grow_reads_zeros() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();

    // same footprint
    blob.set_data(&mut db, &vec![0xFF; 6000]).unwrap();
    blob.resize(&mut db, 4500).unwrap();
    blob.resize(&mut db, 6000).unwrap();
    assert!(blob.read(&db, 4500, 1500).unwrap().iter().all(|&b| b == 0));

    // inline
    blob.set_data(&mut db, &vec![0xFF; 300]).unwrap();
    blob.resize(&mut db, 10).unwrap();
    blob.resize(&mut db, 300).unwrap();
    assert!(blob.read(&db, 10, 290).unwrap().iter().all(|&b| b == 0));

    // regular down to inline and back
    blob.set_data(&mut db, &vec![0xFF; 8000]).unwrap();
    blob.resize(&mut db, 50).unwrap();
    blob.resize(&mut db, 8000).unwrap();
    assert!(blob.read(&db, 50, 7950).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_resize_to_zero() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, &pattern(5000)).unwrap();

    blob.resize(&mut db, 0).unwrap();

    assert!(blob.is_empty());
    assert_eq!(blob.kind(), PageKind::Small);
}

// =============================================================================
// Bounds Tests
// =============================================================================

#[test]
fn test_read_past_end_fails() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"0123456789").unwrap();

    assert!(matches!(
        blob.read(&db, 5, 6),
        Err(DbError::OutOfRange { index: 11, len: 10 })
    ));
}

#[test]
fn test_write_past_end_fails() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"0123456789").unwrap();

    assert!(matches!(
        blob.write(&mut db, 8, b"abc"),
        Err(DbError::OutOfRange { .. })
    ));
    assert_eq!(blob.read_all(&db).unwrap(), b"0123456789");
}

#[test]
fn test_offset_overflow_is_out_of_range() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"0123456789").unwrap();

    assert!(matches!(
        blob.read(&db, u64::MAX, 1),
        Err(DbError::OutOfRange { index: u64::MAX, len: 10 })
    ));
    assert!(matches!(
        blob.write(&mut db, u64::MAX, b"x"),
        Err(DbError::OutOfRange { .. })
    ));
}

#[test]
fn test_resize_beyond_address_space_fails() {
    let (_temp, mut db) = setup_temp_db();
    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"kept").unwrap();

    for length in [u64::MAX, 1 << 44] {
        assert!(matches!(
            blob.resize(&mut db, length),
            Err(DbError::CapacityExceeded(_))
        ));
    }
    assert_eq!(blob.len(), 4);
    assert_eq!(blob.kind(), PageKind::Small);
    assert_eq!(blob.read_all(&db).unwrap(), b"kept");
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_blob_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    let small = b"small blob".to_vec();
    let large = pattern(20_000);

    let (small_root, large_root) = {
        let mut db = Database::open_path(&path).unwrap();
        let mut a = db.blob().unwrap();
        let mut b = db.blob().unwrap();
        a.set_data(&mut db, &small).unwrap();
        b.set_data(&mut db, &large).unwrap();
        let roots = (a.root(), b.root());
        db.close().unwrap();
        roots
    };

    let db = Database::open_path(&path).unwrap();
    let mut a = Blob::load(&db, small_root).unwrap();
    let mut b = Blob::load(&db, large_root).unwrap();
    assert_eq!(a.read_all(&db).unwrap(), small);
    assert_eq!(b.read_all(&db).unwrap(), large);
}
