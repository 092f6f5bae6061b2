//! Which sources cover which aggregation cells.
//!
//! - [`Catalog`]: sources, collections and leaf tiles on disk
//! - [`CoverageManifest`]: the ordered layer list of one cell
//! - [`resolve`]: overlap detection, manifest building and coalescing

mod catalog;
mod manifest;
mod resolver;

pub use catalog::{Catalog, Collection, CollectionItem, LeafTile, Source, COLLECTION_FILE};
pub use manifest::{CellKind, CellPlan, CoverageManifest, ManifestEntry, ManifestItem};
pub use resolver::{
    assign_direct_copy, build_manifests, cell_max_zoom, cell_raster_side, coalesce,
    detect_overlaps, resolve, OverlapSet, ResolverConfig, DEFAULT_AGGREGATION_ZOOM,
    DEFAULT_BUFFER_METERS, DEFAULT_MAX_CELL_PIXELS, DEFAULT_MIN_COALESCE_ZOOM,
};
