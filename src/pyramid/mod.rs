//! Cell raster pyramids.
//!
//! A cell raster at zoom `z0` with side `512 · 2^k` holds the tiles of zooms
//! `z0 ..= z0 + k`. [`RasterPyramid`] computes the coarser levels;
//! [`PyramidEncoder`] slices them into terrarium tiles and writes the cell
//! archive.

mod encoder;
mod overview;

pub use encoder::{EncodedTile, PyramidEncoder};
pub use overview::RasterPyramid;
