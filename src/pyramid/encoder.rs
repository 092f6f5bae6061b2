//! Slicing a pyramid into tiles and packing them into an archive.

use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::overview::RasterPyramid;
use crate::archive::{tile_id, ArchiveProperties, ArchiveSummary, ArchiveWriter};
use crate::error::{PipelineError, PyramidError};
use crate::raster::{RasterBlock, Window};
use crate::tile::{encode_grid, TileCoord, TileEncoder, TileFormat, TILE_SIZE};

/// One compressed tile ready for the archive.
#[derive(Debug, Clone)]
pub struct EncodedTile {
    pub coord: TileCoord,
    pub tile_id: u64,
    pub data: Bytes,
}

/// Encodes cell pyramids into tiles and writes cell archives.
#[derive(Debug, Clone)]
pub struct PyramidEncoder {
    encoder: TileEncoder,
    emit_min_zoom: u8,
    attribution: String,
}

impl PyramidEncoder {
    /// # Arguments
    /// * `format` - Tile image container
    /// * `emit_min_zoom` - Coarsest zoom written to cell archives; coarser
    ///   zooms are left to the downsampler
    /// * `attribution` - Attribution stored in archive metadata
    pub fn new(format: TileFormat, emit_min_zoom: u8, attribution: impl Into<String>) -> Self {
        Self {
            encoder: TileEncoder::new(format),
            emit_min_zoom,
            attribution: attribution.into(),
        }
    }

    /// Zoom range emitted for a pyramid.
    pub fn zoom_range(&self, pyramid: &RasterPyramid) -> Result<(u8, u8), PyramidError> {
        let min_zoom = pyramid.min_zoom().max(self.emit_min_zoom);
        let max_zoom = pyramid.max_zoom();
        if min_zoom > max_zoom {
            return Err(PyramidError::InvalidZoomRange { min_zoom, max_zoom });
        }
        Ok((min_zoom, max_zoom))
    }

    /// Encode every tile of the emitted zoom range, in tile id order.
    ///
    /// Windows that hold only nodata are not emitted. Encoding runs on the
    /// rayon pool.
    pub fn encode(&self, pyramid: &RasterPyramid) -> Result<Vec<EncodedTile>, PyramidError> {
        let (min_zoom, max_zoom) = self.zoom_range(pyramid)?;
        let cell = pyramid.cell();

        let mut jobs: Vec<(TileCoord, &RasterBlock, Window)> = Vec::new();
        for zoom in min_zoom..=max_zoom {
            let Some(level) = pyramid.level(zoom) else {
                continue;
            };
            for coord in cell.descendants_at(zoom) {
                let col = (coord.x - (cell.x << (zoom - cell.z))) as usize * TILE_SIZE;
                let row = (coord.y - (cell.y << (zoom - cell.z))) as usize * TILE_SIZE;
                jobs.push((coord, level, Window::new(col, row, TILE_SIZE, TILE_SIZE)));
            }
        }

        let encoded: Vec<Option<EncodedTile>> = jobs
            .par_iter()
            .map(|(coord, level, window)| self.encode_window(*coord, level, *window))
            .collect::<Result<_, _>>()?;

        let mut tiles: Vec<EncodedTile> = encoded.into_iter().flatten().collect();
        tiles.sort_by_key(|t| t.tile_id);
        Ok(tiles)
    }

    fn encode_window(
        &self,
        coord: TileCoord,
        level: &RasterBlock,
        window: Window,
    ) -> Result<Option<EncodedTile>, PyramidError> {
        let block = level
            .window(window)
            .map_err(|_| PyramidError::InvalidBlockSize {
                width: level.width(),
                height: level.height(),
                tile_size: TILE_SIZE,
            })?;
        if block.is_empty() {
            return Ok(None);
        }
        let rgb = encode_grid(block.data());
        let data = self.encoder.encode(&rgb, TILE_SIZE as u32)?;
        Ok(Some(EncodedTile {
            coord,
            tile_id: tile_id(&coord),
            data,
        }))
    }

    /// Build the pyramid of a cell raster and publish it as an archive.
    ///
    /// Returns `None` when the raster holds no data at all, in which case
    /// nothing is written.
    pub fn write_archive(
        &self,
        cell: TileCoord,
        base: RasterBlock,
        path: &Path,
    ) -> Result<Option<ArchiveSummary>, PipelineError> {
        let start = Instant::now();
        let pyramid = RasterPyramid::build(cell, base)?;
        let (min_zoom, max_zoom) = self.zoom_range(&pyramid)?;
        let tiles = self.encode(&pyramid)?;
        drop(pyramid);

        if tiles.is_empty() {
            warn!(cell = %cell, "Cell raster is entirely nodata, no archive written");
            return Ok(None);
        }
        let encoded_ms = start.elapsed().as_millis() as u64;

        let mut writer = ArchiveWriter::create(path)?;
        for tile in &tiles {
            writer.append(tile.tile_id, &tile.data)?;
        }
        let summary = writer.finalize(&ArchiveProperties {
            tile_format: self.encoder.format(),
            min_zoom,
            max_zoom,
            bounds: cell.lnglat_bounds(),
            attribution: self.attribution.clone(),
        })?;

        debug!(
            cell = %cell,
            tiles = summary.addressed_tiles,
            min_zoom,
            max_zoom,
            encoded_ms,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Wrote cell archive"
        );
        Ok(Some(summary))
    }
}
