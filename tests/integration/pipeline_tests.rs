//! cover → aggregate → downsample over a small catalog.

use std::sync::Arc;
use std::time::Duration;

use elevation_mosaic::coverage::{Catalog, ResolverConfig};
use elevation_mosaic::pipeline::{
    cover, downsample, inspect, AggregateOptions, Aggregator, DownsampleOptions,
};
use elevation_mosaic::store::{RunId, StageOutcome, StoreLayout};
use elevation_mosaic::tile::{TileFormat, NODATA};

use super::test_utils::{
    padded_grid, read_tile_values, tile, write_collection, write_leaf, MockToolkit,
};

const ALPHA: f32 = 1000.0;
const BETA: f32 = 400.0;

/// `alpha` and `beta` both hold 9-5-3, `beta` also holds its eastern
/// neighbour 9-6-3.
fn build_catalog(root: &std::path::Path) {
    let a = tile(9, 5, 3);
    let b = tile(9, 6, 3);

    write_collection(root, "alpha", "a1", "2025-01-01T00:00:00Z", 9, &[(a, false)]);
    write_leaf(root, "alpha", "a1", &a, &padded_grid(&a, 9, 0), |_, _| ALPHA);
    write_collection(root, "beta", "b1", "2025-02-01T00:00:00Z", 9, &[(a, false), (b, false)]);
    write_leaf(root, "beta", "b1", &a, &padded_grid(&a, 9, 0), |_, _| BETA);
    write_leaf(root, "beta", "b1", &b, &padded_grid(&b, 9, 0), |_, _| BETA);
}

fn aggregate_options() -> AggregateOptions {
    AggregateOptions {
        workers: 2,
        buffer_m: 2000.0,
        aggregation_zoom: 9,
        tile_format: TileFormat::Png,
        attribution: "test".to_string(),
    }
}

fn downsample_options() -> DownsampleOptions {
    DownsampleOptions {
        workers: 2,
        aggregation_zoom: 9,
        extent_depth: 3,
        tile_format: TileFormat::Png,
        attribution: "test".to_string(),
    }
}

#[tokio::test]
async fn test_full_run_and_unchanged_rerun() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    build_catalog(catalog_dir.path());
    let catalog = Arc::new(Catalog::load(catalog_dir.path()).unwrap());
    let store = StoreLayout::new(store_dir.path());

    // cover
    let report = cover(&catalog, &store, &ResolverConfig::default()).unwrap();
    assert_eq!(report.total_cells, 2);
    assert_eq!(report.dirty_cells, vec![tile(9, 5, 3), tile(9, 6, 3)]);
    let run = report.run.clone();

    // aggregate
    let toolkit = MockToolkit::new();
    let aggregator = Aggregator::new(
        Arc::clone(&toolkit),
        Arc::clone(&catalog),
        store.clone(),
        &aggregate_options(),
    );
    let summary = aggregator.run(&run).await.unwrap();
    assert!(summary.is_success(), "{:?}", summary.failed);
    assert_eq!(summary.completed, 2);
    assert_eq!(store.archive_cells(&run).unwrap().len(), 2);
    assert!(!store.work_dir(&run, &tile(9, 5, 3)).exists());

    // alpha outranks beta (equal zoom, earlier name) away from its edges
    let archive = store.cell_archive_path(&run, &tile(9, 5, 3));
    let values = read_tile_values(&archive, &tile(9, 5, 3)).await.unwrap();
    assert_eq!(values[256 * 512 + 256], ALPHA);
    assert!(values.iter().all(|&v| (BETA..=ALPHA).contains(&v)));
    // Inside 9-6-3 only beta has data
    let archive = store.cell_archive_path(&run, &tile(9, 6, 3));
    let values = read_tile_values(&archive, &tile(9, 6, 3)).await.unwrap();
    assert!(values.iter().all(|&v| v == BETA));

    // A second aggregate finds every archive in place
    let again = aggregator.run(&run).await.unwrap();
    assert_eq!(again.skipped, 2);
    assert_eq!(again.completed, 0);

    // downsample
    let summary = downsample(&store, &run, &downsample_options()).await.unwrap();
    assert!(summary.is_success(), "{:?}", summary.failed);
    assert_eq!(summary.completed, 9);
    let parent = store.downsample_archive_path(&run, &tile(5, 0, 0), 8);
    let values = read_tile_values(&parent, &tile(8, 2, 1)).await.unwrap();
    // 9-5-3 is the SE child of 8-2-1; the other quadrants have no archive
    assert_eq!(values[320 * 512 + 320], ALPHA);
    assert_eq!(values[0], NODATA);
    assert_eq!(values[300], NODATA);
    assert_eq!(values[300 * 512], NODATA);
    assert!(read_tile_values(&parent, &tile(8, 3, 1)).await.is_some());

    let root = store.downsample_archive_path(&run, &tile(0, 0, 0), 0);
    let report = inspect(&root).await.unwrap();
    assert_eq!(report.header.min_zoom, 0);
    assert_eq!(report.tiles_per_zoom.get(&0), Some(&1));

    // Rerun with no source changes
    std::thread::sleep(Duration::from_millis(2));
    let rerun = cover(&catalog, &store, &ResolverConfig::default()).unwrap();
    assert_ne!(rerun.run, run);
    assert!(rerun.dirty_cells.is_empty());
    assert!(!store.run_dir(&rerun.run).exists());
}

#[tokio::test]
async fn test_changed_source_marks_cells_dirty() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    build_catalog(catalog_dir.path());
    let store = StoreLayout::new(store_dir.path());

    let catalog = Catalog::load(catalog_dir.path()).unwrap();
    let first = cover(&catalog, &store, &ResolverConfig::default()).unwrap();
    // Stand-in archives, as if aggregate had run
    for cell in &first.dirty_cells {
        std::fs::write(store.cell_archive_path(&first.run, cell), b"").unwrap();
    }

    // A newer beta delivery only replaces 9-6-3
    let grid = padded_grid(&tile(9, 6, 3), 9, 0);
    write_collection(
        catalog_dir.path(),
        "beta",
        "b2",
        "2025-06-01T00:00:00Z",
        9,
        &[(tile(9, 6, 3), false)],
    );
    write_leaf(catalog_dir.path(), "beta", "b2", &tile(9, 6, 3), &grid, |_, _| BETA + 10.0);

    std::thread::sleep(Duration::from_millis(2));
    let catalog = Catalog::load(catalog_dir.path()).unwrap();
    let second = cover(&catalog, &store, &ResolverConfig::default()).unwrap();
    // Both cells see the new leaf: one owns it, the other through its buffer
    assert_eq!(second.dirty_cells, vec![tile(9, 5, 3), tile(9, 6, 3)]);

    std::thread::sleep(Duration::from_millis(2));
    for cell in &second.dirty_cells {
        std::fs::write(store.cell_archive_path(&second.run, cell), b"").unwrap();
    }
    let third = cover(&catalog, &store, &ResolverConfig::default()).unwrap();
    assert!(third.dirty_cells.is_empty());
}

#[tokio::test]
async fn test_downsample_is_idempotent() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    build_catalog(catalog_dir.path());
    let catalog = Arc::new(Catalog::load(catalog_dir.path()).unwrap());
    let store = StoreLayout::new(store_dir.path());

    let run = cover(&catalog, &store, &ResolverConfig::default())
        .unwrap()
        .run;
    Aggregator::new(MockToolkit::new(), catalog, store.clone(), &aggregate_options())
        .run(&run)
        .await
        .unwrap();

    let first = downsample(&store, &run, &downsample_options()).await.unwrap();
    let second = downsample(&store, &run, &downsample_options()).await.unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, first.completed);
}

#[tokio::test]
async fn test_unknown_run_is_empty() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = StoreLayout::new(store_dir.path());
    let run = RunId::generate();

    let summary = downsample(&store, &run, &downsample_options()).await.unwrap();
    assert_eq!(summary.total(), 0);
    assert!(summary.is_success());
}

#[tokio::test]
async fn test_aggregate_skips_published_cell() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    build_catalog(catalog_dir.path());
    let catalog = Arc::new(Catalog::load(catalog_dir.path()).unwrap());
    let store = StoreLayout::new(store_dir.path());

    let run = cover(&catalog, &store, &ResolverConfig::default())
        .unwrap()
        .run;
    let cell = tile(9, 6, 3);
    std::fs::write(store.cell_archive_path(&run, &cell), b"").unwrap();
    std::fs::create_dir_all(store.work_dir(&run, &cell)).unwrap();

    let toolkit = MockToolkit::new();
    let aggregator = Aggregator::new(
        Arc::clone(&toolkit),
        catalog,
        store.clone(),
        &aggregate_options(),
    );
    let outcome = aggregator.process_cell(&run, &cell).await.unwrap();
    assert_eq!(outcome, StageOutcome::Skipped);
    assert!(!store.work_dir(&run, &cell).exists());
    assert_eq!(toolkit.reprojects(), 0);
}
