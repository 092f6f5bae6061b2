//! Cell archives written through the pyramid encoder and read back.

use elevation_mosaic::archive::{ArchiveRegistry, LocalArchiveSource};
use elevation_mosaic::pipeline::inspect;
use elevation_mosaic::pyramid::PyramidEncoder;
use elevation_mosaic::raster::{GeoTransform, RasterBlock};
use elevation_mosaic::tile::{resolution, TileCoord, TileFormat, NODATA};

use super::test_utils::{open_archive, read_tile_values, tile};

/// A 1024×1024 raster of cell 8-2-1 at zoom 9 where each pixel holds its
/// column index.
fn column_raster(cell: &TileCoord) -> RasterBlock {
    let side = 1024;
    let data = (0..side * side).map(|i| (i % side) as f32).collect();
    let transform = GeoTransform::for_bounds(&cell.xy_bounds(), resolution(9));
    RasterBlock::new(side, side, data, transform).unwrap()
}

fn encoder() -> PyramidEncoder {
    PyramidEncoder::new(TileFormat::Png, 0, "test data")
}

#[tokio::test]
async fn test_cell_archive_values() {
    let dir = tempfile::tempdir().unwrap();
    let cell = tile(8, 2, 1);
    let path = dir.path().join("8-2-1.pmtiles");

    let summary = encoder()
        .write_archive(cell, column_raster(&cell), &path)
        .unwrap()
        .unwrap();
    assert_eq!(summary.addressed_tiles, 5);

    // 9-5-3 is the SE child: columns 512..1024
    let values = read_tile_values(&path, &tile(9, 5, 3)).await.unwrap();
    assert_eq!(values[0], 512.0);
    assert_eq!(values[511], 1023.0);
    assert_eq!(values[300 * 512 + 511], 1023.0);

    // The overview averages column pairs
    let values = read_tile_values(&path, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(values[0], 0.5);
    assert_eq!(values[511], 1022.5);

    assert!(read_tile_values(&path, &tile(9, 6, 3)).await.is_none());
    assert!(read_tile_values(&path, &tile(7, 1, 0)).await.is_none());
}

#[tokio::test]
async fn test_inspect_reports_zooms_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let cell = tile(8, 2, 1);
    let path = dir.path().join("8-2-1.pmtiles");
    encoder()
        .write_archive(cell, column_raster(&cell), &path)
        .unwrap();

    let report = inspect(&path).await.unwrap();
    assert_eq!(report.header.min_zoom, 8);
    assert_eq!(report.header.max_zoom, 9);
    assert_eq!(report.header.tile_type, TileFormat::Png.tile_type());
    assert_eq!(report.tiles_per_zoom.get(&8), Some(&1));
    assert_eq!(report.tiles_per_zoom.get(&9), Some(&4));
    assert_eq!(report.metadata["attribution"], "test data");

    let bounds = cell.lnglat_bounds();
    assert!((f64::from(report.header.min_lon_e7) / 1e7 - bounds.min_x).abs() < 1e-6);
    assert!((f64::from(report.header.max_lat_e7) / 1e7 - bounds.max_y).abs() < 1e-6);
}

#[tokio::test]
async fn test_empty_tiles_are_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let cell = tile(8, 2, 1);
    let path = dir.path().join("8-2-1.pmtiles");

    // NW quarter (tile 9-4-2) has no data
    let mut raster = column_raster(&cell);
    let data = raster.data_mut();
    for row in 0..512 {
        for col in 0..512 {
            data[row * 1024 + col] = NODATA;
        }
    }
    let summary = encoder().write_archive(cell, raster, &path).unwrap().unwrap();
    assert_eq!(summary.addressed_tiles, 4);

    assert!(read_tile_values(&path, &tile(9, 4, 2)).await.is_none());
    let overview = read_tile_values(&path, &tile(8, 2, 1)).await.unwrap();
    assert_eq!(overview[0], NODATA);
    assert_eq!(overview[256 * 512], 0.5);
}

#[tokio::test]
async fn test_all_nodata_cell_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cell = tile(9, 5, 3);
    let path = dir.path().join("9-5-3.pmtiles");
    let transform = GeoTransform::for_bounds(&cell.xy_bounds(), resolution(9));
    let raster = RasterBlock::filled(512, 512, NODATA, transform);

    assert!(encoder().write_archive(cell, raster, &path).unwrap().is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_registry_serves_same_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let cell = tile(8, 2, 1);
    encoder()
        .write_archive(cell, column_raster(&cell), &dir.path().join("run/8-2-1.pmtiles"))
        .unwrap();

    let registry = ArchiveRegistry::new(LocalArchiveSource::new(dir.path()));
    let cached = registry.get("run/8-2-1.pmtiles").await.unwrap();
    let direct = open_archive(&dir.path().join("run/8-2-1.pmtiles")).await;

    for coord in [tile(8, 2, 1), tile(9, 4, 2), tile(9, 5, 3)] {
        let a = cached.get_tile(&coord).await.unwrap().unwrap();
        let b = direct.get_tile(&coord).await.unwrap().unwrap();
        assert_eq!(a, b);
    }

    registry.get("run/8-2-1.pmtiles").await.unwrap();
    assert_eq!(registry.cached_count().await, 1);
    assert!(registry.get("run/missing.pmtiles").await.is_err());
}
