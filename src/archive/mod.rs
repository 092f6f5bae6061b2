//! Single-file tile archives (PMTiles v3 layout).
//!
//! ```text
//! ┌────────┬────────────────┬──────────┬──────────────────┬───────────┐
//! │ header │ root directory │ metadata │ leaf directories │ tile data │
//! │ 127 B  │ varints        │ JSON     │ varints          │ raw       │
//! └────────┴────────────────┴──────────┴──────────────────┴───────────┘
//! ```
//!
//! - [`ArchiveWriter`]: append tiles in id order, then serialize with
//!   `pmtiles2` and publish atomically
//! - [`ArchiveReader`]: random access by tile coordinate over a range reader
//! - [`ArchiveRegistry`]: LRU + singleflight of opened readers

pub mod directory;
mod header;
mod reader;
mod registry;
mod tile_id;
mod writer;

pub use directory::DirEntry;
pub use header::{ArchiveHeader, COMPRESSION_GZIP, COMPRESSION_NONE, HEADER_SIZE};
pub use reader::ArchiveReader;
pub use registry::{ArchiveRegistry, ArchiveSource, CachedArchive, LocalArchiveSource};
pub use tile_id::{tile_coord, tile_id};
pub use writer::{ArchiveProperties, ArchiveSummary, ArchiveWriter};

/// Attribution written into every archive's metadata unless overridden.
pub const DEFAULT_ATTRIBUTION: &str = "Elevation Mosaic";
