//! Per-cell blend state machine.
//!
//! ```text
//! Unstarted ──reproject──▶ Reprojected ──merge──▶ Merged ──crop──▶ Cropped
//!     │                                                              ▲
//!     └──────────────────────── direct copy ─────────────────────────┘
//! ```
//!
//! Each transition is recorded by a sentinel in the cell's work directory,
//! written only after the stage output is on disk, so an interrupted run
//! resumes at the first unfinished stage.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::feather::fold;
use crate::coverage::{cell_max_zoom, Catalog, CellKind, CellPlan, LeafTile};
use crate::error::{BlendError, IoError, RasterError};
use crate::raster::{
    GridSpec, RasterBlock, RasterFile, RasterHandle, RasterToolkit, Window, TARGET_CRS,
};
use crate::store::{is_done, mark_done, write_json_atomic, RunId, Sentinel, StoreLayout};
use crate::tile::{resolution, TileCoord};

/// Merged raster, buffer included.
const MERGED_FILE: &str = "merged.raster";

/// Final cell raster, buffer removed.
const CROPPED_FILE: &str = "cropped.raster";

/// One reprojected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub source: String,
    pub crs: String,
    pub raster: RasterHandle,
}

/// Content of `reprojection.json`: the layers in fold order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionRecord {
    pub buffer_pixels: usize,
    pub layers: Vec<LayerRecord>,
}

/// Last completed stage of a cell.
///
/// `Cropped` is the finished state: the cell raster is on disk and only
/// waits to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlendStage {
    Unstarted,
    Reprojected,
    Merged,
    Cropped,
}

/// Leaves of one source sharing a CRS; the unit of reprojection.
struct Layer {
    source: String,
    crs: String,
    leaves: Vec<LeafTile>,
}

/// Runs the blend stages of cells against a toolkit.
pub struct CellBlender<T> {
    toolkit: Arc<T>,
    catalog: Arc<Catalog>,
    store: StoreLayout,
    buffer_m: f64,
}

impl<T: RasterToolkit> CellBlender<T> {
    pub fn new(toolkit: Arc<T>, catalog: Arc<Catalog>, store: StoreLayout, buffer_m: f64) -> Self {
        Self {
            toolkit,
            catalog,
            store,
            buffer_m,
        }
    }

    pub fn stage(&self, run: &RunId, cell: &TileCoord) -> BlendStage {
        let done = |s| is_done(&self.store.sentinel_path(run, cell, s));
        if done(Sentinel::Cropped) {
            BlendStage::Cropped
        } else if done(Sentinel::Merged) {
            BlendStage::Merged
        } else if done(Sentinel::Reprojected) {
            BlendStage::Reprojected
        } else {
            BlendStage::Unstarted
        }
    }

    /// Path of the finished cell raster.
    pub fn cropped_path(&self, run: &RunId, cell: &TileCoord) -> PathBuf {
        self.store.work_dir(run, cell).join(CROPPED_FILE)
    }

    /// Drive a cell to [`BlendStage::Cropped`] and return its raster.
    pub async fn blend(&self, run: &RunId, plan: &CellPlan) -> Result<RasterBlock, BlendError> {
        let cell = &plan.cell;
        let work = self.store.work_dir(run, cell);
        fs::create_dir_all(&work).map_err(|e| IoError::from_std(&work, e))?;

        let stage = self.stage(run, cell);
        if stage > BlendStage::Unstarted {
            debug!(cell = %cell, stage = ?stage, "Resuming cell");
        }

        if stage < BlendStage::Cropped {
            let copied = plan.kind == CellKind::DirectCopy && self.direct_copy(run, plan).await?;
            if !copied {
                if stage < BlendStage::Reprojected {
                    self.reproject(run, plan).await?;
                }
                if stage < BlendStage::Merged {
                    self.merge(run, cell).await?;
                }
                self.crop(run, cell).await?;
            }
        }

        Ok(RasterBlock::load(&self.cropped_path(run, cell)).await?)
    }

    /// Layers of a manifest in fold order, split by CRS within a source.
    fn layers(&self, plan: &CellPlan) -> Result<Vec<Layer>, BlendError> {
        let mut layers = Vec::new();
        for entry in plan.manifest.fold_order() {
            if self.catalog.source(&entry.source).is_none() {
                return Err(BlendError::UnknownSource(entry.source.clone()));
            }

            let mut by_crs: BTreeMap<String, Vec<LeafTile>> = BTreeMap::new();
            for item in &entry.items {
                let missing = || BlendError::MissingLeaf {
                    source_name: entry.source.clone(),
                    leaf: format!("{}/{}-{}-{}", item.collection_id, item.z, item.x, item.y),
                };
                let coord = item.coord().map_err(|_| missing())?;
                let leaf = self
                    .catalog
                    .leaf(&entry.source, &item.collection_id, &coord)
                    .ok_or_else(missing)?;
                if !leaf.path.is_file() {
                    return Err(missing());
                }
                by_crs.entry(leaf.crs.clone()).or_default().push(leaf);
            }

            for (crs, leaves) in by_crs {
                layers.push(Layer {
                    source: entry.source.clone(),
                    crs,
                    leaves,
                });
            }
        }

        if layers.is_empty() {
            return Err(BlendError::EmptyManifest(plan.cell.name()));
        }
        Ok(layers)
    }

    /// Target grid of a cell and its buffer in pixels.
    ///
    /// The buffer is only used when there is something to blend, and is
    /// rounded down to whole pixels.
    fn grid(&self, plan: &CellPlan, layer_count: usize) -> (GridSpec, usize) {
        let max_zoom = cell_max_zoom(&self.catalog, &plan.cell, &plan.manifest);
        let res = resolution(max_zoom);
        let buffer_pixels = if layer_count > 1 {
            (self.buffer_m / res).floor() as usize
        } else {
            0
        };
        let extent = plan.cell.xy_bounds().buffered(buffer_pixels as f64 * res);
        (GridSpec::new(extent, res), buffer_pixels)
    }

    /// Copy a single native leaf into the cell raster.
    ///
    /// Returns `false` without touching the work directory when the leaf is
    /// not in the target CRS; the cell then goes through reprojection.
    async fn direct_copy(&self, run: &RunId, plan: &CellPlan) -> Result<bool, BlendError> {
        let cell = &plan.cell;
        let layers = self.layers(plan)?;
        let Some(leaf) = layers.first().and_then(|l| l.leaves.first()) else {
            return Err(BlendError::EmptyManifest(cell.name()));
        };
        if leaf.crs != TARGET_CRS {
            debug!(cell = %cell, crs = %leaf.crs, "Leaf needs reprojection");
            return Ok(false);
        }
        let (grid, _) = self.grid(plan, 1);

        let output = self.store.work_dir(run, cell).join("direct-3857.bin");
        let raster = self.toolkit.translate(&leaf.path, &grid, &output).await?;
        let block = self
            .toolkit
            .read_window(&raster, raster.full_window())
            .await?;
        save_blocking(block, self.cropped_path(run, cell)).await?;
        mark_done(&self.store.sentinel_path(run, cell, Sentinel::Cropped))?;

        info!(cell = %cell, source = %leaf.source, "Copied single leaf");
        Ok(true)
    }

    async fn reproject(&self, run: &RunId, plan: &CellPlan) -> Result<(), BlendError> {
        let cell = &plan.cell;
        let start = Instant::now();
        let layers = self.layers(plan)?;
        let (grid, buffer_pixels) = self.grid(plan, layers.len());
        let work = self.store.work_dir(run, cell);

        let mut records = Vec::with_capacity(layers.len());
        for (i, layer) in layers.iter().enumerate() {
            let inputs: Vec<PathBuf> = layer.leaves.iter().map(|l| l.path.clone()).collect();
            let vrt = self
                .toolkit
                .mosaic(&inputs, &work.join(format!("{i}.vrt")))
                .await?;
            let raster = self
                .toolkit
                .reproject(&vrt, &layer.crs, &grid, &work.join(format!("{i}-3857.bin")))
                .await?;
            records.push(LayerRecord {
                source: layer.source.clone(),
                crs: layer.crs.clone(),
                raster,
            });

            if layers.len() > 1 {
                let raster = &records[records.len() - 1].raster;
                let block = self
                    .toolkit
                    .read_window(raster, raster.full_window())
                    .await?;
                if !self.toolkit.contains_sentinel(&block) {
                    debug!(cell = %cell, source = %layer.source, "Layer is gap-free, skipping the rest");
                    break;
                }
            }
        }

        let record = ReprojectionRecord {
            buffer_pixels,
            layers: records,
        };
        write_json_atomic(
            &self.store.sentinel_path(run, cell, Sentinel::Reprojected),
            &record,
        )?;

        info!(
            cell = %cell,
            layers = record.layers.len(),
            buffer_pixels,
            size = grid.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reprojected layers"
        );
        Ok(())
    }

    fn read_record(&self, run: &RunId, cell: &TileCoord) -> Result<ReprojectionRecord, BlendError> {
        let path = self.store.sentinel_path(run, cell, Sentinel::Reprojected);
        let bytes = fs::read(&path).map_err(|e| IoError::from_std(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| BlendError::InvalidMetadata {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    async fn merge(&self, run: &RunId, cell: &TileCoord) -> Result<(), BlendError> {
        let start = Instant::now();
        let record = self.read_record(run, cell)?;

        let mut blocks = Vec::with_capacity(record.layers.len());
        for layer in &record.layers {
            blocks.push(
                self.toolkit
                    .read_window(&layer.raster, layer.raster.full_window())
                    .await?,
            );
        }

        let layer_count = blocks.len();
        let buffer_pixels = record.buffer_pixels;
        let merged_path = self.store.work_dir(run, cell).join(MERGED_FILE);
        let name = cell.name();
        tokio::task::spawn_blocking(move || -> Result<(), BlendError> {
            let merged = fold(blocks, buffer_pixels)?.ok_or(BlendError::EmptyManifest(name))?;
            merged.save(&merged_path)?;
            Ok(())
        })
        .await
        .map_err(|e| BlendError::Join(e.to_string()))??;

        mark_done(&self.store.sentinel_path(run, cell, Sentinel::Merged))?;
        info!(
            cell = %cell,
            layers = layer_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merged layers"
        );
        Ok(())
    }

    async fn crop(&self, run: &RunId, cell: &TileCoord) -> Result<(), BlendError> {
        let record = self.read_record(run, cell)?;
        let margin = record.buffer_pixels;
        let merged = RasterFile::open_framed(&self.store.work_dir(run, cell).join(MERGED_FILE))
            .await?;
        let (width, height) = (merged.width(), merged.height());
        if 2 * margin >= width || 2 * margin >= height {
            return Err(RasterError::CropTooLarge {
                margin,
                width,
                height,
            }
            .into());
        }

        let block = merged
            .read_window(Window::new(
                margin,
                margin,
                width - 2 * margin,
                height - 2 * margin,
            ))
            .await?;
        save_blocking(block, self.cropped_path(run, cell)).await?;
        mark_done(&self.store.sentinel_path(run, cell, Sentinel::Cropped))?;

        debug!(cell = %cell, margin, "Cropped buffer");
        Ok(())
    }
}

async fn save_blocking(block: RasterBlock, path: PathBuf) -> Result<(), BlendError> {
    tokio::task::spawn_blocking(move || block.save(&path))
        .await
        .map_err(|e| BlendError::Join(e.to_string()))??;
    Ok(())
}
