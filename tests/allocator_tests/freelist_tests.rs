//! Tests for the block allocator
//!
//! These tests verify:
//! - Device growth when nothing is free
//! - LIFO reuse of freed blocks
//! - The free list crossing its SMALL/REGULAR boundary in both directions
//! - The free list crossing into two-level page tables and back
//! - Rejection of reserved and unknown blocks

use std::collections::BTreeSet;

use everdb::page::{INDEX_SIZE, ONE_LEVEL};
use everdb::{Database, DbError, PageKind};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_path(temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

fn allocate_n(db: &mut Database, n: usize) -> Vec<u32> {
    (0..n).map(|_| db.allocate().unwrap()).collect()
}

/// Free-list slots in SMALL form (u32 items, 18-byte header)
const SMALL_CAPACITY: u64 = (4096 - 18) / 4;

// =============================================================================
// Basic Allocation Tests
// =============================================================================

#[test]
fn test_new_database_grows_from_block_two() {
    let (_temp, mut db) = setup_temp_db();

    assert_eq!(db.block_count(), 2);
    assert_eq!(db.allocate().unwrap(), 2);
    assert_eq!(db.allocate().unwrap(), 3);
    assert_eq!(db.block_count(), 4);
    assert_eq!(db.free_count(), 0);
}

#[test]
fn test_free_then_allocate_reuses_block() {
    let (_temp, mut db) = setup_temp_db();
    let blocks = allocate_n(&mut db, 4);

    db.free(blocks[1]).unwrap();
    assert_eq!(db.free_count(), 1);

    assert_eq!(db.allocate().unwrap(), blocks[1]);
    assert_eq!(db.free_count(), 0);
    assert_eq!(db.block_count(), 6);
}

#[test]
fn test_reuse_is_lifo() {
    let (_temp, mut db) = setup_temp_db();
    let blocks = allocate_n(&mut db, 3);

    for &b in &blocks {
        db.free(b).unwrap();
    }
    assert_eq!(db.free_blocks().unwrap(), blocks);

    let reused = allocate_n(&mut db, 3);
    let mut expected = blocks.clone();
    expected.reverse();
    assert_eq!(reused, expected);

    // nothing left: the device grows again
    assert_eq!(db.allocate().unwrap(), 5);
}

// =============================================================================
// Storage Boundary Tests
// =============================================================================

#[test]
fn test_free_list_promotes_using_freed_block() {
    let (_temp, mut db) = setup_temp_db();
    let blocks = allocate_n(&mut db, SMALL_CAPACITY as usize + 10);
    let total = db.block_count();

    // fill the inline list up to its spare slot
    for &b in &blocks[..SMALL_CAPACITY as usize - 1] {
        db.free(b).unwrap();
    }
    assert_eq!(db.freelist().kind(), PageKind::Small);
    assert_eq!(db.free_count(), SMALL_CAPACITY - 1);

    // the next freed block becomes the list's storage instead of an entry
    let absorbed = blocks[SMALL_CAPACITY as usize - 1];
    db.free(absorbed).unwrap();
    assert_eq!(db.freelist().kind(), PageKind::Regular);
    assert_eq!(db.freelist().num_blocks(), 1);
    assert_eq!(db.free_count(), SMALL_CAPACITY - 1);
    assert_eq!(db.block_count(), total);

    // and comes back first, demoting the list again
    assert_eq!(db.allocate().unwrap(), absorbed);
    assert_eq!(db.freelist().kind(), PageKind::Small);
    assert_eq!(db.free_count(), SMALL_CAPACITY - 1);
}

#[test]
fn test_free_list_round_trip_across_many_blocks() {
    let (_temp, mut db) = setup_temp_db();
    let blocks = allocate_n(&mut db, 3000);
    let total = db.block_count();

    for &b in &blocks {
        db.free(b).unwrap();
    }
    assert_eq!(db.freelist().kind(), PageKind::Regular);
    assert!(db.free_count() < 3000);
    assert!(db.freelist().capacity() >= db.free_count() + 1);

    let reused = allocate_n(&mut db, 3000);
    assert_eq!(db.block_count(), total, "no growth while blocks are free");
    assert_eq!(db.free_count(), 0);
    assert_eq!(db.freelist().kind(), PageKind::Small);

    let expected: BTreeSet<u32> = blocks.into_iter().collect();
    let actual: BTreeSet<u32> = reused.into_iter().collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_alternating_free_allocate_at_boundary_is_stable() {
    let (_temp, mut db) = setup_temp_db();
    let blocks = allocate_n(&mut db, SMALL_CAPACITY as usize + 1);
    for &b in &blocks[..SMALL_CAPACITY as usize - 1] {
        db.free(b).unwrap();
    }
    let extra = blocks[SMALL_CAPACITY as usize];
    let total = db.block_count();

    for _ in 0..20 {
        db.free(extra).unwrap();
        assert_eq!(db.allocate().unwrap(), extra);
    }
    assert_eq!(db.block_count(), total);
    assert_eq!(db.freelist().kind(), PageKind::Small);
}

/// Frees enough blocks that the list's own page needs a page table
///
/// Slow: the device reaches about 2 GiB.
#[test]
#[ignore]
fn test_free_list_crosses_two_level_boundary() {
    let (_temp, mut db) = setup_temp_db();
    let n = ONE_LEVEL as usize * INDEX_SIZE as usize + 3000;
    let blocks = allocate_n(&mut db, n);
    let total = db.block_count();

    // free everything; near the boundary, check that a freed block comes
    // straight back and put back whatever was handed out
    let mut reordered = Vec::new();
    for (k, &b) in blocks.iter().enumerate() {
        db.free(b).unwrap();
        assert!(db.freelist().capacity() >= db.free_count() + 1);

        let num_blocks = db.freelist().num_blocks();
        if (ONE_LEVEL - 1..=ONE_LEVEL + 1).contains(&num_blocks) {
            let got = db.allocate().unwrap();
            if got != b {
                reordered.push((k, got, db.freelist().num_blocks()));
            }
            db.free(got).unwrap();
            assert!(db.freelist().capacity() >= db.free_count() + 1);
        }
    }
    assert!(db.freelist().num_blocks() > ONE_LEVEL);
    assert!(db.block_count() - total <= 1, "page table takes at most one new block");

    // a single step hands back an older block: the one the table displaced
    assert_eq!(reordered.len(), 1, "{:?}", reordered);
    let (k, got, num_blocks) = reordered[0];
    assert!(got >= blocks[0] && got < blocks[k], "{} not freed before step {}", got, k);
    assert!((ONE_LEVEL..=ONE_LEVEL + 1).contains(&num_blocks));

    // drain the list completely, releasing its storage on the way down
    let mut reused = Vec::with_capacity(n + 1);
    while db.free_count() > 0 || db.freelist().kind() == PageKind::Regular {
        reused.push(db.allocate().unwrap());
        assert!(db.freelist().capacity() >= db.free_count() + 1);
    }

    let grown = db.block_count() - total;
    assert!(grown <= 1);
    let actual: BTreeSet<u32> = reused.iter().copied().collect();
    assert_eq!(actual.len(), reused.len(), "block handed out twice");

    let expected: BTreeSet<u32> = blocks.into_iter().chain(total..total + grown).collect();
    assert_eq!(actual, expected, "every block is reused exactly once");
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_free_reserved_block_rejected() {
    let (_temp, mut db) = setup_temp_db();

    assert!(matches!(db.free(0), Err(DbError::Config(_))));
    assert!(matches!(db.free(1), Err(DbError::Config(_))));
    assert_eq!(db.free_count(), 0);
}

#[test]
fn test_free_unknown_block_rejected() {
    let (_temp, mut db) = setup_temp_db();

    assert!(matches!(
        db.free(99),
        Err(DbError::OutOfRange { index: 99, len: 2 })
    ));
}

#[test]
fn test_free_list_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");

    let freed = {
        let mut db = Database::open_path(&path).unwrap();
        let blocks = allocate_n(&mut db, 8);
        db.free(blocks[2]).unwrap();
        db.free(blocks[6]).unwrap();
        db.close().unwrap();
        blocks
    };

    let mut db = Database::open_path(&path).unwrap();
    assert_eq!(db.free_count(), 2);
    assert_eq!(db.allocate().unwrap(), freed[6]);
    assert_eq!(db.allocate().unwrap(), freed[2]);
}
