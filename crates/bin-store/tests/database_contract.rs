//! Lifecycle contract of the bin database, run against both storage
//! backends with settings small enough to force cache evictions and quad page
//! spills.

use std::fs;
use std::path::Path;

use bin_store::store::{create_store, load_records};
use bin_store::{
    BinDatabase, BinDatabaseConfig, BinIndex, BinStoreError, BoundingBox, DatabaseState, GeoPos,
    StorageType, StoreFileRole,
};

fn config(storage_type: StorageType) -> BinDatabaseConfig {
    BinDatabaseConfig {
        cell_size_km: 2003.8,
        storage_type,
        bin_cache_capacity: 3,
        quad_page_bins: 8,
        quad_resident_pages: 2,
    }
}

const BACKENDS: [StorageType; 2] = [StorageType::Simple, StorageType::Quad];

/// Accumulate one observation into the (sum, count) band of the bin at `pos`.
fn observe(db: &mut BinDatabase, pos: GeoPos, value: f32) -> BinIndex {
    let (index, bin) = db.bin_at(pos).unwrap();
    let sum = bin.read(0).unwrap();
    bin.write(0, sum + value).unwrap();
    let count = bin.read(1).unwrap();
    bin.write(1, count + 1.0).unwrap();
    index
}

fn collect(db: &mut BinDatabase) -> Vec<(BinIndex, Vec<f32>)> {
    db.iterate()
        .unwrap()
        .map(|item| {
            let (index, bin) = item.unwrap();
            (index, bin.save(None))
        })
        .collect()
}

fn fill(db: &mut BinDatabase) {
    // Spread over many rows so both the cache and quad pages churn
    for i in 0..40 {
        let lat = -85.0 + (i % 10) as f64 * 18.0;
        let lon = -170.0 + (i * 37 % 340) as f64;
        observe(db, GeoPos::new(lat, lon), i as f32);
    }
}

// ============================================================================
// Temp lifecycle
// ============================================================================

#[test]
fn test_iterate_is_ascending_and_sees_all_writes() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();
        fill(&mut db);
        assert!(db.cache_stats().evictions > 0, "{}", storage_type);

        let bins = collect(&mut db);
        assert!(!bins.is_empty());
        assert!(bins.windows(2).all(|w| w[0].0 < w[1].0), "{}", storage_type);

        let observations: f32 = bins.iter().map(|(_, v)| v[1]).sum();
        assert_eq!(observations, 40.0, "{}", storage_type);

        // A second pass starts over
        assert_eq!(collect(&mut db), bins);
    }
}

#[test]
fn test_reference_positions() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();

        assert_eq!(observe(&mut db, GeoPos::new(-85.0, 33.0), 2.0), 1);
        assert_eq!(observe(&mut db, GeoPos::new(58.0, -13.0), 4.0), 120);
        assert_eq!(observe(&mut db, GeoPos::new(-85.0, 33.0), 3.0), 1);

        let bins = collect(&mut db);
        assert_eq!(bins, vec![(1, vec![5.0, 2.0]), (120, vec![4.0, 1.0])]);
    }
}

#[test]
fn test_bounds_cover_written_cells() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();
        assert!(db.properties().bounds.is_none());

        observe(&mut db, GeoPos::new(-85.0, 33.0), 1.0);
        observe(&mut db, GeoPos::new(58.0, -13.0), 1.0);
        db.flush().unwrap();

        // Row 0 col 1 of 3 and row 8 col 4 of 9
        assert_eq!(
            db.properties().bounds,
            Some(BoundingBox::new(-90.0, 72.0, -60.0, 60.0))
        );
    }
}

#[test]
fn test_flush_and_reopen_resumes() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();
        fill(&mut db);
        db.add_processed_product().unwrap();
        db.flush().unwrap();
        let expected = collect(&mut db);

        // Not flushed: lost when the run is interrupted
        observe(&mut db, GeoPos::new(0.0, 0.0), 100.0);
        db.add_processed_product().unwrap();
        drop(db);

        let mut db = BinDatabase::open(dir.path(), &config(storage_type)).unwrap();
        assert_eq!(db.state(), DatabaseState::Temp);
        assert_eq!(db.storage_type(), storage_type);
        assert_eq!(db.properties().processed_products, 1);
        assert_eq!(collect(&mut db), expected);

        observe(&mut db, GeoPos::new(0.0, 0.0), 100.0);
        assert_eq!(db.add_processed_product().unwrap(), 2);
        db.close().unwrap();
        assert!(!dir.path().join("pages").exists());
    }
}

#[test]
fn test_open_uses_persisted_backend() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut db = BinDatabase::create(dir.path(), &config(StorageType::Quad), &[1]).unwrap();
    db.get_or_create(7).unwrap().write(0, 1.0).unwrap();
    db.close().unwrap();

    let db = BinDatabase::open(dir.path(), &config(StorageType::Simple)).unwrap();
    assert_eq!(db.storage_type(), StorageType::Quad);
    assert_eq!(db.stored_bin_count(), 1);
}

#[test]
fn test_open_missing_database() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    assert!(matches!(
        BinDatabase::open(dir.path(), &BinDatabaseConfig::default()),
        Err(BinStoreError::NotFound(_))
    ));
}

// ============================================================================
// Finalize
// ============================================================================

fn file_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).expect("Failed to read store file")
}

#[test]
fn test_finalize_commits_once() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();
        fill(&mut db);
        db.add_processed_product().unwrap();
        let expected = collect(&mut db);

        let summary = db.finalize().unwrap();
        assert_eq!(summary.bins_written, expected.len() as u64);

        let final_path = db.store_path(StoreFileRole::Final);
        assert_eq!(summary.bytes_written, fs::metadata(&final_path).unwrap().len());
        assert!(!db.store_path(StoreFileRole::Temp).exists());
        assert_eq!(db.state(), DatabaseState::Final);
        assert!(db.properties().finalized_at.is_some());

        let before = file_bytes(&final_path);
        assert!(matches!(
            db.finalize(),
            Err(BinStoreError::AlreadyFinalized(_))
        ));
        assert_eq!(file_bytes(&final_path), before);

        // Still readable after the cache was released
        assert_eq!(collect(&mut db), expected);
    }
}

#[test]
fn test_reopen_final_database_read_only() {
    for storage_type in BACKENDS {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut db = BinDatabase::create(dir.path(), &config(storage_type), &[2]).unwrap();
        fill(&mut db);
        let expected = collect(&mut db);
        db.finalize().unwrap();
        drop(db);

        let mut db = BinDatabase::open(dir.path(), &config(storage_type)).unwrap();
        assert_eq!(db.state(), DatabaseState::Final);
        assert_eq!(collect(&mut db), expected);
        assert!(matches!(db.get_or_create(0), Err(BinStoreError::ReadOnly(_))));
        assert!(matches!(
            db.finalize(),
            Err(BinStoreError::AlreadyFinalized(_))
        ));
    }
}

#[test]
fn test_final_store_readable_by_either_backend() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut db = BinDatabase::create(dir.path(), &config(StorageType::Quad), &[2]).unwrap();
    fill(&mut db);
    db.finalize().unwrap();
    let final_path = db.store_path(StoreFileRole::Final);
    let total = db.locator().total_bin_count();
    let stored = db.stored_bin_count();

    for storage_type in BACKENDS {
        let mut store = create_store(
            storage_type,
            total,
            2,
            &config(storage_type),
            dir.path().join("reader-pages"),
        )
        .unwrap();
        assert_eq!(load_records(store.as_mut(), &final_path).unwrap(), stored);
    }
}

#[test]
fn test_delete_removes_database() {
    for storage_type in BACKENDS {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = tmp.path().join("run.l3db");
        let mut db = BinDatabase::create(&dir, &config(storage_type), &[2]).unwrap();
        fill(&mut db);
        db.finalize().unwrap();
        drop(db);

        BinDatabase::delete(&dir).unwrap();
        assert!(!dir.exists());
    }
}
