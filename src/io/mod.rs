//! Byte-range access to stored archives and rasters.

mod block_cache;
mod local_reader;
mod range_reader;

pub use block_cache::{BlockCache, CacheStats, DEFAULT_BLOCK_SIZE};
pub use local_reader::LocalFileReader;
pub use range_reader::{f32_samples, le_at, LeField, RangeReader};
