//! Registry of opened archives.
//!
//! The downsampler reads four children per parent tile, and neighbouring
//! parents usually draw from the same archives. The registry keeps:
//! - an LRU of opened readers, so headers and root directories are parsed
//!   once per archive
//! - a singleflight table, so concurrent requests for the same archive share
//!   one open
//! - a block cache under each reader
//!
//! # Example
//!
//! ```ignore
//! use elevation_mosaic::archive::{ArchiveRegistry, LocalArchiveSource};
//!
//! let registry = ArchiveRegistry::new(LocalArchiveSource::new("/data/store"));
//! let archive = registry.get("0190f3d2-.../9-5-3.pmtiles").await?;
//! let tile = archive.get_tile(&coord).await?;
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::reader::ArchiveReader;
use crate::error::{ArchiveError, IoError};
use crate::io::{BlockCache, LocalFileReader, RangeReader, DEFAULT_BLOCK_SIZE};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of opened archives kept.
const DEFAULT_ARCHIVE_CACHE_CAPACITY: usize = 64;

/// Default number of blocks cached per archive.
const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 16;

// =============================================================================
// ArchiveSource Trait
// =============================================================================

/// Creates range readers from archive identifiers.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    type Reader: RangeReader + 'static;

    /// Create a range reader for `archive_id` (a path relative to the source).
    async fn create_reader(&self, archive_id: &str) -> Result<Self::Reader, IoError>;
}

/// Archives stored below a local directory.
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    root: PathBuf,
}

impl LocalArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveSource for LocalArchiveSource {
    type Reader = LocalFileReader;

    async fn create_reader(&self, archive_id: &str) -> Result<Self::Reader, IoError> {
        LocalFileReader::open(self.root.join(archive_id)).await
    }
}

/// Reader type handed out by a registry over source `S`.
pub type CachedArchive<S> = ArchiveReader<BlockCache<<S as ArchiveSource>::Reader>>;

// =============================================================================
// ArchiveRegistry
// =============================================================================

pub struct ArchiveRegistry<S: ArchiveSource> {
    source: S,
    archives: Mutex<LruCache<String, Arc<CachedArchive<S>>>>,
    /// Opens in progress, keyed like `archives`.
    opening: Mutex<HashMap<String, Arc<OnceCell<Arc<CachedArchive<S>>>>>>,
    block_size: usize,
    block_cache_capacity: usize,
}

impl<S: ArchiveSource> ArchiveRegistry<S> {
    pub fn new(source: S) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_ARCHIVE_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// # Arguments
    /// * `source` - Where archives are opened from
    /// * `archive_capacity` - Maximum number of open archives
    /// * `block_size` - Block size for each archive's block cache (bytes)
    /// * `block_cache_capacity` - Number of blocks cached per archive
    pub fn with_capacity(
        source: S,
        archive_capacity: usize,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Self {
        Self {
            source,
            archives: Mutex::new(LruCache::new(
                NonZeroUsize::new(archive_capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            opening: Mutex::new(HashMap::new()),
            block_size,
            block_cache_capacity,
        }
    }

    /// Get an archive, opening it if not already cached.
    ///
    /// A failed open is not cached; the next call tries again.
    pub async fn get(&self, archive_id: &str) -> Result<Arc<CachedArchive<S>>, ArchiveError> {
        if let Some(archive) = self.archives.lock().await.get(archive_id) {
            return Ok(Arc::clone(archive));
        }

        let cell = {
            let mut opening = self.opening.lock().await;
            if let Some(archive) = self.archives.lock().await.get(archive_id) {
                return Ok(Arc::clone(archive));
            }
            opening.entry(archive_id.to_string()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| self.open(archive_id))
            .await
            .cloned();

        if let Ok(archive) = &result {
            self.archives
                .lock()
                .await
                .put(archive_id.to_string(), Arc::clone(archive));
        }
        self.opening.lock().await.remove(archive_id);
        result
    }

    async fn open(&self, archive_id: &str) -> Result<Arc<CachedArchive<S>>, ArchiveError> {
        let reader = self.source.create_reader(archive_id).await?;
        let cached = BlockCache::with_capacity(reader, self.block_size, self.block_cache_capacity);
        let archive = ArchiveReader::open(Arc::new(cached)).await?;
        debug!(archive = archive_id, tiles = archive.header().addressed_tiles, "Opened archive");
        Ok(Arc::new(archive))
    }

    /// Number of archives currently cached.
    pub async fn cached_count(&self) -> usize {
        self.archives.lock().await.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
