//! Coarser zooms from archived tiles.
//!
//! For each parent zoom `p` below the aggregation zoom, parents are grouped
//! into extents at zoom `p - depth`. Each extent reads its children at `p + 1`
//! from the newest archives covering them and writes one archive,
//! `{extent}-{p}.pmtiles`. Levels run finest first, since each level reads the
//! archives of the one before.

mod plan;
mod sampler;

pub use plan::{
    child_archives, extent_zoom, plan_level, ChildArchive, DownsampleManifest,
    DEFAULT_EXTENT_DEPTH,
};
pub use sampler::{average_children, ChildGrid, Downsampler};
