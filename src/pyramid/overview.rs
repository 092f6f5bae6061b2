//! Cell rasters and their overview levels.

use crate::error::PyramidError;
use crate::raster::RasterBlock;
use crate::tile::{TileCoord, TILE_SIZE};

/// A cell raster at its finest zoom plus one overview per coarser zoom, down
/// to the cell's own zoom.
///
/// `levels[0]` is the base; `levels[i]` has half the side of `levels[i - 1]`.
#[derive(Debug, Clone)]
pub struct RasterPyramid {
    cell: TileCoord,
    max_zoom: u8,
    levels: Vec<RasterBlock>,
}

impl RasterPyramid {
    /// Validate `base` and compute its overviews by nodata-aware 2×2 means.
    pub fn build(cell: TileCoord, base: RasterBlock) -> Result<Self, PyramidError> {
        let depth = validate_base(&base)?;
        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(base);
        for _ in 0..depth {
            let next = levels[levels.len() - 1].mean_2x2();
            levels.push(next);
        }
        Self::from_levels(cell, levels)
    }

    /// Assemble a pyramid from precomputed levels, checking that the
    /// overview count matches the zoom span.
    pub fn from_levels(cell: TileCoord, levels: Vec<RasterBlock>) -> Result<Self, PyramidError> {
        let Some(base) = levels.first() else {
            return Err(PyramidError::OverviewMismatch {
                expected: 0,
                actual: 0,
            });
        };
        let depth = validate_base(base)?;
        let side = base.width();

        let overviews = levels.len() - 1;
        if overviews != depth as usize {
            return Err(PyramidError::OverviewMismatch {
                expected: depth as usize,
                actual: overviews,
            });
        }
        for (i, level) in levels.iter().enumerate() {
            let expected = side >> i;
            if level.width() != expected || level.height() != expected {
                return Err(PyramidError::InvalidBlockSize {
                    width: level.width(),
                    height: level.height(),
                    tile_size: TILE_SIZE,
                });
            }
        }

        Ok(Self {
            cell,
            max_zoom: cell.z + depth,
            levels,
        })
    }

    pub fn cell(&self) -> TileCoord {
        self.cell
    }

    /// Zoom whose resolution matches the base level.
    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn min_zoom(&self) -> u8 {
        self.cell.z
    }

    /// Level holding zoom `zoom`, if the pyramid spans it.
    pub fn level(&self, zoom: u8) -> Option<&RasterBlock> {
        if zoom < self.cell.z || zoom > self.max_zoom {
            return None;
        }
        self.levels.get(usize::from(self.max_zoom - zoom))
    }
}

/// Check that `base` is square with a side of `512 · 2^k`; return `k`.
fn validate_base(base: &RasterBlock) -> Result<u8, PyramidError> {
    let (width, height) = (base.width(), base.height());
    let invalid = || PyramidError::InvalidBlockSize {
        width,
        height,
        tile_size: TILE_SIZE,
    };
    if width != height || width == 0 || width % TILE_SIZE != 0 {
        return Err(invalid());
    }
    let blocks = width / TILE_SIZE;
    if !blocks.is_power_of_two() {
        return Err(invalid());
    }
    u8::try_from(blocks.trailing_zeros()).map_err(|_| invalid())
}
