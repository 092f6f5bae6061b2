//! Seamless merging of overlapping source layers into one raster per cell.
//!
//! - [`feather`]: erosion, box filter and the alpha fold
//! - [`CellBlender`]: the resumable reproject → merge → crop stages

pub mod feather;
mod cell;

pub use cell::{BlendStage, CellBlender, LayerRecord, ReprojectionRecord};
pub use feather::{blend_layer, fold, kernel_sizes, smoothstep};
