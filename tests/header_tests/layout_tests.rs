//! Tests for the header codec
//!
//! These tests verify:
//! - Field ordering and sizes
//! - Checksums on blocks written by real objects
//! - Corruption detection on load

use everdb::device::BLOCK_SIZE;
use everdb::header::{self, Field, Layout, Width, CRC32_MAGIC};
use everdb::{Array, Blob, Database, DbError, Hash, Page};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_path(temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

fn flip_bit(db: &mut Database, block: u32, byte: usize, bit: u8) {
    let mut raw = db.read_block(block).unwrap().to_vec();
    raw[byte] ^= 1 << bit;
    db.write_block(block, &raw).unwrap();
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_layout_independent_of_declaration_order() {
    let a = Layout::new(&[
        Field::new("length", Width::U64),
        Field::new("type", Width::U8),
        Field::new("num_blocks", Width::U32),
    ]);
    let b = Layout::new(&[
        Field::new("num_blocks", Width::U32),
        Field::new("length", Width::U64),
        Field::new("type", Width::U8),
    ]);

    assert_eq!(a.names(), b.names());
    assert_eq!(a.size(), 17);
}

#[test]
fn test_field_values_round_trip_at_max_width() {
    let layout = Layout::new(&[
        Field::new("a", Width::U8),
        Field::new("b", Width::U16),
        Field::new("c", Width::U32),
        Field::new("d", Width::U64),
    ]);
    let mut block = vec![0u8; BLOCK_SIZE];

    layout.set(&mut block, "a", u8::MAX as u64);
    layout.set(&mut block, "b", u16::MAX as u64);
    layout.set(&mut block, "c", u32::MAX as u64);
    layout.set(&mut block, "d", u64::MAX);
    header::seal(&mut block);

    assert!(header::verify(&block));
    assert_eq!(layout.get(&block, "a"), u8::MAX as u64);
    assert_eq!(layout.get(&block, "b"), u16::MAX as u64);
    assert_eq!(layout.get(&block, "c"), u32::MAX as u64);
    assert_eq!(layout.get(&block, "d"), u64::MAX);
}

#[test]
fn test_sealed_block_has_magic_residue() {
    let mut block = vec![0xA5u8; BLOCK_SIZE];
    header::seal(&mut block);
    assert_eq!(crc32fast::hash(&block), CRC32_MAGIC);
}

// =============================================================================
// Object Header Tests
// =============================================================================

#[test]
fn test_object_header_sizes() {
    let (_temp, mut db) = setup_temp_db();

    let page = db.page().unwrap();
    let blob = db.blob().unwrap();

    assert_eq!(page.header_size(), 9);
    assert_eq!(blob.page().header_size(), 17);
    assert_eq!(page.max_small(), BLOCK_SIZE - 9);
}

#[test]
fn test_every_object_root_is_sealed() {
    let (_temp, mut db) = setup_temp_db();

    let page = db.page().unwrap();
    let blob = db.blob().unwrap();
    let array = db.array::<u32>().unwrap();
    let hash = db.hash::<String, u64>().unwrap();

    for root in [1, page.root(), blob.root(), array.root(), hash.root()] {
        assert!(header::verify(db.read_block(root).unwrap()), "block {}", root);
    }
}

#[test]
fn test_inline_write_reseals_root() {
    let (_temp, mut db) = setup_temp_db();

    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"hello world").unwrap();
    blob.write(&mut db, 6, b"WORLD").unwrap();

    assert!(header::verify(db.read_block(blob.root()).unwrap()));
    let mut loaded = Blob::load(&db, blob.root()).unwrap();
    assert_eq!(loaded.read_all(&db).unwrap(), b"hello WORLD");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_data_bit_detected_on_load() {
    let (_temp, mut db) = setup_temp_db();

    let mut blob = db.blob().unwrap();
    blob.set_data(&mut db, b"checksummed").unwrap();
    let root = blob.root();

    flip_bit(&mut db, root, 3, 5);

    assert!(matches!(
        Blob::load(&db, root),
        Err(DbError::Corruption { block }) if block == root
    ));
}

#[test]
fn test_flipped_header_bit_detected_on_load() {
    let (_temp, mut db) = setup_temp_db();

    let array = db.array::<u64>().unwrap();
    let root = array.root();

    flip_bit(&mut db, root, BLOCK_SIZE - 10, 0);

    assert!(matches!(
        Array::<u64>::load(&db, root),
        Err(DbError::Corruption { .. })
    ));
}

#[test]
fn test_flipped_crc_bit_detected_on_load() {
    let (_temp, mut db) = setup_temp_db();

    let hash = db.hash::<u32, u32>().unwrap();
    let page = db.page().unwrap();

    flip_bit(&mut db, hash.root(), BLOCK_SIZE - 1, 7);
    flip_bit(&mut db, page.root(), BLOCK_SIZE - 4, 0);

    assert!(matches!(
        Hash::<u32, u32>::load(&db, hash.root()),
        Err(DbError::Corruption { .. })
    ));
    assert!(matches!(
        Page::load(&db, page.root()),
        Err(DbError::Corruption { .. })
    ));
}
