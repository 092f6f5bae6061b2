//! Elevation rasters and the toolkit that produces them.
//!
//! - [`RasterBlock`]: an in-memory grid with its geotransform
//! - [`RasterFile`]: windowed reads of a raster on disk
//! - [`RasterToolkit`]: mosaic, reproject and translate; [`GdalToolkit`] runs
//!   the GDAL command-line tools

mod block;
mod toolkit;

pub use block::{
    nodata_mean, GeoTransform, GridSpec, RasterBlock, RasterFile, Window, FRAMED_HEADER_SIZE,
};
pub use toolkit::{
    read_raw_window, verify_output, GdalToolkit, RasterHandle, RasterToolkit, VirtualRaster,
    TARGET_CRS,
};
