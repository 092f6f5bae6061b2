//! Test utilities for integration tests.
//!
//! This module provides a mock raster toolkit and helpers for building
//! catalogs and reading archives back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use elevation_mosaic::archive::ArchiveReader;
use elevation_mosaic::error::{IoError, ToolkitError};
use elevation_mosaic::io::LocalFileReader;
use elevation_mosaic::raster::{
    read_raw_window, GridSpec, RasterBlock, RasterHandle, RasterToolkit, VirtualRaster, Window,
    TARGET_CRS,
};
use elevation_mosaic::tile::{decode_grid, TileCoord, TileEncoder, NODATA, TILE_SIZE};

// =============================================================================
// Mock Toolkit
// =============================================================================

/// A raster toolkit that resamples framed leaf rasters by nearest neighbour.
///
/// Leaf files are expected to be written with [`RasterBlock::save`] on an
/// EPSG:3857 grid, whatever CRS their collection declares; the declared CRS
/// is only recorded. Later inputs of a mosaic are drawn on top of earlier
/// ones, like `gdalbuildvrt`. Calls are counted per operation.
#[derive(Default)]
pub struct MockToolkit {
    pub mosaic_calls: AtomicUsize,
    pub reproject_calls: AtomicUsize,
    pub translate_calls: AtomicUsize,
    source_crs: Mutex<Vec<String>>,
}

impl MockToolkit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reprojects(&self) -> usize {
        self.reproject_calls.load(Ordering::SeqCst)
    }

    pub fn translates(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    /// Source CRS of every reprojection, in call order.
    pub fn reprojected_from(&self) -> Vec<String> {
        self.source_crs.lock().unwrap().clone()
    }

    async fn resample(
        inputs: &[PathBuf],
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError> {
        let mut sources = Vec::with_capacity(inputs.len());
        for path in inputs {
            sources.push(RasterBlock::load(path).await?);
        }

        let transform = grid.transform();
        let (width, height) = (grid.width(), grid.height());
        let mut out = RasterBlock::filled(width, height, NODATA, transform);
        let data = out.data_mut();
        for row in 0..height {
            let y = transform.origin_y - (row as f64 + 0.5) * transform.pixel_size;
            for col in 0..width {
                let x = transform.origin_x + (col as f64 + 0.5) * transform.pixel_size;
                for source in &sources {
                    let t = source.transform();
                    if let Some((c, r)) = t.pixel_at(x, y, source.width(), source.height()) {
                        let v = source.get(c, r);
                        if v != NODATA {
                            data[row * width + col] = v;
                        }
                    }
                }
            }
        }

        out.save_raw(output)?;
        Ok(RasterHandle::on_grid(output, grid))
    }
}

#[async_trait]
impl RasterToolkit for MockToolkit {
    async fn mosaic(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<VirtualRaster, ToolkitError> {
        self.mosaic_calls.fetch_add(1, Ordering::SeqCst);
        let listing: Vec<String> = inputs.iter().map(|p| p.display().to_string()).collect();
        fs::write(output, listing.join("\n")).map_err(|e| IoError::from_std(output, e))?;
        Ok(VirtualRaster {
            path: output.to_path_buf(),
            inputs: inputs.to_vec(),
        })
    }

    async fn reproject(
        &self,
        input: &VirtualRaster,
        source_crs: &str,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError> {
        self.reproject_calls.fetch_add(1, Ordering::SeqCst);
        self.source_crs.lock().unwrap().push(source_crs.to_string());
        Self::resample(&input.inputs, grid, output).await
    }

    async fn translate(
        &self,
        input: &Path,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        Self::resample(&[input.to_path_buf()], grid, output).await
    }

    async fn read_window(
        &self,
        raster: &RasterHandle,
        window: Window,
    ) -> Result<RasterBlock, ToolkitError> {
        read_raw_window(raster, window).await
    }
}

// =============================================================================
// Catalog Builders
// =============================================================================

/// Write a complete EPSG:3857 `collection.json` for `source`.
///
/// # Arguments
/// * `root` - Catalog directory
/// * `created` - RFC 3339 timestamp
/// * `items` - Leaf addresses with their `contains_nodata` flag
pub fn write_collection(
    root: &Path,
    source: &str,
    collection_id: &str,
    created: &str,
    max_zoom: u8,
    items: &[(TileCoord, bool)],
) {
    write_collection_in(root, source, collection_id, created, max_zoom, TARGET_CRS, items);
}

/// [`write_collection`] with an explicit CRS.
pub fn write_collection_in(
    root: &Path,
    source: &str,
    collection_id: &str,
    created: &str,
    max_zoom: u8,
    crs: &str,
    items: &[(TileCoord, bool)],
) {
    let dir = root.join(source).join(collection_id);
    fs::create_dir_all(&dir).unwrap();
    let items: Vec<_> = items
        .iter()
        .map(|(c, nodata)| json!({ "x": c.x, "y": c.y, "z": c.z, "contains_nodata": nodata }))
        .collect();
    let collection = json!({
        "id": collection_id,
        "created": created,
        "crs": crs,
        "max_zoom": max_zoom,
        "complete": true,
        "items": items,
    });
    fs::write(
        dir.join("collection.json"),
        serde_json::to_vec_pretty(&collection).unwrap(),
    )
    .unwrap();
}

/// Write the raster of a leaf, sampling `value(x, y)` at pixel centres of
/// `grid`.
pub fn write_leaf(
    root: &Path,
    source: &str,
    collection_id: &str,
    coord: &TileCoord,
    grid: &GridSpec,
    value: impl Fn(f64, f64) -> f32,
) -> PathBuf {
    let transform = grid.transform();
    let (width, height) = (grid.width(), grid.height());
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let y = transform.origin_y - (row as f64 + 0.5) * transform.pixel_size;
        for col in 0..width {
            let x = transform.origin_x + (col as f64 + 0.5) * transform.pixel_size;
            data.push(value(x, y));
        }
    }
    let block = RasterBlock::new(width, height, data, transform).unwrap();
    let path = root
        .join(source)
        .join(collection_id)
        .join(format!("{}.tiff", coord.name()));
    block.save(&path).unwrap();
    path
}

/// Grid at the resolution of `zoom` around `cell`, padded by `margin`
/// pixels on each side.
pub fn padded_grid(cell: &TileCoord, zoom: u8, margin: usize) -> GridSpec {
    let res = elevation_mosaic::tile::resolution(zoom);
    GridSpec::new(cell.xy_bounds().buffered(margin as f64 * res), res)
}

pub fn tile(z: u8, x: u32, y: u32) -> TileCoord {
    TileCoord::new(z, x, y).unwrap()
}

// =============================================================================
// Archive Helpers
// =============================================================================

pub async fn open_archive(path: &Path) -> ArchiveReader<LocalFileReader> {
    let reader = LocalFileReader::open(path).await.unwrap();
    ArchiveReader::open(Arc::new(reader)).await.unwrap()
}

/// Decoded elevations of one archived tile, or `None` if absent.
pub async fn read_tile_values(path: &Path, coord: &TileCoord) -> Option<Vec<f32>> {
    let archive = open_archive(path).await;
    let bytes = archive.get_tile(coord).await.unwrap()?;
    let rgb = TileEncoder::default()
        .decode(&bytes, TILE_SIZE as u32)
        .unwrap();
    Some(decode_grid(&rgb))
}

/// A `TILE_SIZE × TILE_SIZE` grid of one value.
pub fn constant_tile(value: f32) -> Vec<f32> {
    vec![value; TILE_SIZE * TILE_SIZE]
}
