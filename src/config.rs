//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `MOSAIC_` prefix:
//!
//! - `MOSAIC_CATALOG` - Catalog directory (default: source-store)
//! - `MOSAIC_STORE` - Aggregation store directory (default: aggregation-store)
//! - `MOSAIC_RUN_ID` - Run to operate on (printed by `cover`)
//! - `MOSAIC_AGGREGATION_ZOOM` - Zoom of aggregation cells (default: 9)
//! - `MOSAIC_BUFFER_METERS` - Blend buffer around each cell (default: 2000)
//! - `MOSAIC_MAX_CELL_PIXELS` - Largest coalesced cell raster side (default: 16384)
//! - `MOSAIC_MIN_COALESCE_ZOOM` - Coarsest zoom cells may be coalesced to (default: 0)
//! - `MOSAIC_WORKERS` - Cells or extents processed concurrently (default: 4)
//! - `MOSAIC_TILE_FORMAT` - `webp` or `png` (default: webp)
//! - `MOSAIC_ATTRIBUTION` - Attribution stored in archive metadata
//! - `MOSAIC_EXTENT_DEPTH` - Zooms between a downsample extent and its tiles (default: 3)
//! - `MOSAIC_GDAL_BIN` - Directory holding the GDAL command-line tools
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use elevation_mosaic::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Cover(config) => println!("catalog at {}", config.catalog.display()),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::archive::DEFAULT_ATTRIBUTION;
use crate::coverage::{
    ResolverConfig, DEFAULT_AGGREGATION_ZOOM, DEFAULT_BUFFER_METERS, DEFAULT_MAX_CELL_PIXELS,
    DEFAULT_MIN_COALESCE_ZOOM,
};
use crate::downsample::DEFAULT_EXTENT_DEPTH;
use crate::pipeline::{AggregateOptions, DownsampleOptions};
use crate::store::RunId;
use crate::tile::{TileFormat, MAX_ZOOM, TILE_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default catalog directory.
pub const DEFAULT_CATALOG_DIR: &str = "source-store";

/// Default aggregation store directory.
pub const DEFAULT_STORE_DIR: &str = "aggregation-store";

/// Default number of concurrently processed units.
pub const DEFAULT_WORKERS: usize = 4;

/// Largest accepted blend buffer, in metres.
const MAX_BUFFER_METERS: f64 = 100_000.0;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Elevation Mosaic - seamless terrain tiles from overlapping sources.
///
/// Resolves which sources cover which cells, blends overlapping sources with
/// a feathered transition and packs the result into PMTiles archives.
#[derive(Parser, Debug, Clone)]
#[command(name = "elevation-mosaic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve the catalog into per-cell manifests and start a new run.
    Cover(CoverConfig),
    /// Blend and encode every cell of a run.
    Aggregate(AggregateConfig),
    /// Build the zooms below the aggregation zoom for a run.
    Downsample(DownsampleConfig),
    /// Print the header and tile counts of an archive.
    Inspect(InspectConfig),
}

// =============================================================================
// Shared option groups
// =============================================================================

/// Tile output options shared by `aggregate` and `downsample`.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Image container of archived tiles.
    #[arg(long, value_enum, default_value_t = TileFormat::Webp, env = "MOSAIC_TILE_FORMAT")]
    pub tile_format: TileFormat,

    /// Attribution written into archive metadata.
    #[arg(long, default_value = DEFAULT_ATTRIBUTION, env = "MOSAIC_ATTRIBUTION")]
    pub attribution: String,

    /// Number of cells or extents processed concurrently.
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "MOSAIC_WORKERS")]
    pub workers: usize,
}

impl OutputArgs {
    fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn validate_zoom(zoom: u8) -> Result<(), String> {
    if zoom > MAX_ZOOM {
        return Err(format!("aggregation_zoom must be at most {MAX_ZOOM}"));
    }
    Ok(())
}

fn validate_buffer(buffer_m: f64) -> Result<(), String> {
    if !buffer_m.is_finite() || !(0.0..=MAX_BUFFER_METERS).contains(&buffer_m) {
        return Err(format!(
            "buffer_meters must be between 0 and {MAX_BUFFER_METERS}"
        ));
    }
    Ok(())
}

// =============================================================================
// cover
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CoverConfig {
    /// Catalog directory holding `{source}/{collection}/collection.json`.
    #[arg(long, default_value = DEFAULT_CATALOG_DIR, env = "MOSAIC_CATALOG")]
    pub catalog: PathBuf,

    /// Aggregation store directory.
    #[arg(long, default_value = DEFAULT_STORE_DIR, env = "MOSAIC_STORE")]
    pub store: PathBuf,

    /// Zoom of aggregation cells.
    #[arg(long, default_value_t = DEFAULT_AGGREGATION_ZOOM, env = "MOSAIC_AGGREGATION_ZOOM")]
    pub aggregation_zoom: u8,

    /// Blend buffer around each cell, in metres.
    #[arg(long, default_value_t = DEFAULT_BUFFER_METERS, env = "MOSAIC_BUFFER_METERS")]
    pub buffer_meters: f64,

    /// Largest side, in pixels, of a coalesced cell raster.
    #[arg(long, default_value_t = DEFAULT_MAX_CELL_PIXELS, env = "MOSAIC_MAX_CELL_PIXELS")]
    pub max_cell_pixels: u64,

    /// Coarsest zoom cells may be coalesced to.
    #[arg(long, default_value_t = DEFAULT_MIN_COALESCE_ZOOM, env = "MOSAIC_MIN_COALESCE_ZOOM")]
    pub min_coalesce_zoom: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CoverConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_zoom(self.aggregation_zoom)?;
        validate_buffer(self.buffer_meters)?;
        if self.min_coalesce_zoom > self.aggregation_zoom {
            return Err("min_coalesce_zoom must not exceed aggregation_zoom".to_string());
        }
        if self.max_cell_pixels < TILE_SIZE as u64 {
            return Err(format!("max_cell_pixels must be at least {TILE_SIZE}"));
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            aggregation_zoom: self.aggregation_zoom,
            buffer_m: self.buffer_meters,
            max_cell_pixels: self.max_cell_pixels,
            min_coalesce_zoom: self.min_coalesce_zoom,
        }
    }
}

// =============================================================================
// aggregate
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct AggregateConfig {
    /// Catalog directory the run was resolved from.
    #[arg(long, default_value = DEFAULT_CATALOG_DIR, env = "MOSAIC_CATALOG")]
    pub catalog: PathBuf,

    /// Aggregation store directory.
    #[arg(long, default_value = DEFAULT_STORE_DIR, env = "MOSAIC_STORE")]
    pub store: PathBuf,

    /// Run to aggregate, as printed by `cover`.
    #[arg(long, env = "MOSAIC_RUN_ID")]
    pub run_id: RunId,

    /// Zoom of aggregation cells; the coarsest zoom in cell archives.
    #[arg(long, default_value_t = DEFAULT_AGGREGATION_ZOOM, env = "MOSAIC_AGGREGATION_ZOOM")]
    pub aggregation_zoom: u8,

    /// Blend buffer around each cell, in metres.
    #[arg(long, default_value_t = DEFAULT_BUFFER_METERS, env = "MOSAIC_BUFFER_METERS")]
    pub buffer_meters: f64,

    /// Directory holding gdalbuildvrt, gdalwarp and gdal_translate.
    ///
    /// If not specified, the tools are looked up on PATH.
    #[arg(long, env = "MOSAIC_GDAL_BIN")]
    pub gdal_bin: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl AggregateConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_zoom(self.aggregation_zoom)?;
        validate_buffer(self.buffer_meters)?;
        self.output.validate()
    }

    pub fn options(&self) -> AggregateOptions {
        AggregateOptions {
            workers: self.output.workers,
            buffer_m: self.buffer_meters,
            aggregation_zoom: self.aggregation_zoom,
            tile_format: self.output.tile_format,
            attribution: self.output.attribution.clone(),
        }
    }
}

// =============================================================================
// downsample
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct DownsampleConfig {
    /// Aggregation store directory.
    #[arg(long, default_value = DEFAULT_STORE_DIR, env = "MOSAIC_STORE")]
    pub store: PathBuf,

    /// Run to downsample, as printed by `cover`.
    #[arg(long, env = "MOSAIC_RUN_ID")]
    pub run_id: RunId,

    /// Zoom of aggregation cells; downsampling fills the zooms below it.
    #[arg(long, default_value_t = DEFAULT_AGGREGATION_ZOOM, env = "MOSAIC_AGGREGATION_ZOOM")]
    pub aggregation_zoom: u8,

    /// Zooms between a downsample extent and the tiles it holds.
    #[arg(long, default_value_t = DEFAULT_EXTENT_DEPTH, env = "MOSAIC_EXTENT_DEPTH")]
    pub extent_depth: u8,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DownsampleConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_zoom(self.aggregation_zoom)?;
        if self.extent_depth > MAX_ZOOM {
            return Err(format!("extent_depth must be at most {MAX_ZOOM}"));
        }
        self.output.validate()
    }

    pub fn options(&self) -> DownsampleOptions {
        DownsampleOptions {
            workers: self.output.workers,
            aggregation_zoom: self.aggregation_zoom,
            extent_depth: self.extent_depth,
            tile_format: self.output.tile_format,
            attribution: self.output.attribution.clone(),
        }
    }
}

// =============================================================================
// inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Archive to inspect.
    pub path: PathBuf,

    /// Also print the archive's JSON metadata.
    #[arg(long, default_value_t = false)]
    pub metadata: bool,
}

// =============================================================================
// Tests
// =============================================================================
