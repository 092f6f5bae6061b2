//! # Elevation Mosaic
//!
//! Assembles a seamless, multi-resolution elevation coverage from several
//! possibly overlapping source datasets and packs each region into a
//! randomly addressable PMTiles archive.
//!
//! ## Pipeline
//!
//! 1. **cover**: decide, per aggregation cell, which sources contribute and in
//!    what precedence ([`coverage`])
//! 2. **aggregate**: reproject the contributing leaves, blend them with a
//!    feathered transition ([`blend`]), slice the result into a tile pyramid
//!    ([`pyramid`]) and write the cell archive ([`archive`])
//! 3. **downsample**: build the coarser zooms by averaging archived tiles
//!    ([`downsample`])
//!
//! ## Architecture
//!
//! - [`io`] - Range readers and block caching
//! - [`tile`] - Tile addressing, elevation codec, image encoding
//! - [`raster`] - Elevation grids and the external raster toolkit
//! - [`coverage`] - Catalog, overlap detection, manifests
//! - [`blend`] - Per-cell blend stages and the feathering fold
//! - [`pyramid`] - Overviews and tile encoding
//! - [`archive`] - PMTiles writer, reader and registry
//! - [`downsample`] - Coarser zooms from archived children
//! - [`store`] - Store layout, run ids, sentinels
//! - [`pipeline`] - The batch steps behind the CLI
//! - [`config`] - CLI and configuration types

pub mod archive;
pub mod blend;
pub mod config;
pub mod coverage;
pub mod downsample;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod pyramid;
pub mod raster;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use archive::{ArchiveReader, ArchiveRegistry, ArchiveWriter, LocalArchiveSource};
pub use blend::{fold, CellBlender};
pub use config::{Cli, Command};
pub use coverage::{resolve, Catalog, CellKind, CellPlan, CoverageManifest, ResolverConfig};
pub use downsample::{DownsampleManifest, Downsampler};
pub use error::{
    ArchiveError, BlendError, CatalogError, CoordError, DownsampleError, IoError, PipelineError,
    PyramidError, RasterError, TileError, ToolkitError,
};
pub use io::{BlockCache, LocalFileReader, RangeReader};
pub use pipeline::{Aggregator, BatchSummary};
pub use pyramid::{PyramidEncoder, RasterPyramid};
pub use raster::{GdalToolkit, GeoTransform, GridSpec, RasterBlock, RasterToolkit};
pub use store::{RunId, StageOutcome, StoreLayout};
pub use tile::{TileCoord, TileEncoder, TileFormat};
