use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 64KB.
///
/// An archive header, its root directory and metadata fit in the first block
/// of all but the largest archives.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default number of blocks kept per reader.
const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Hit and miss counts of a [`BlockCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Fixed-size block cache in front of a [`RangeReader`].
///
/// Reads are widened to whole blocks, kept in an LRU, and concurrent misses
/// on one block share a single fetch. Raster windows read row by row and
/// directory lookups near the start of an archive both hit the same few
/// blocks repeatedly.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: u64,
    blocks: Mutex<LruCache<u64, Bytes>>,
    /// Fetches in progress; waiters share the cell of the first caller.
    pending: Mutex<HashMap<u64, Arc<OnceCell<Bytes>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<R: RangeReader> BlockCache<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY)
    }

    /// # Arguments
    /// * `block_size` - Bytes per block (at least 1)
    /// * `capacity` - Blocks kept before the least recently used is dropped
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1) as u64,
            blocks: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            pending: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn cached(&self, index: u64) -> Option<Bytes> {
        let block = self.blocks.lock().await.get(&index).cloned();
        if block.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        block
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        if let Some(block) = self.cached(index).await {
            return Ok(block);
        }

        let cell = {
            let mut pending = self.pending.lock().await;
            // The fetch may have finished while we waited for the lock
            if let Some(block) = self.cached(index).await {
                return Ok(block);
            }
            pending.entry(index).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.fetch(index).await
            })
            .await
            .cloned();

        if let Ok(block) = &result {
            self.blocks.lock().await.put(index, block.clone());
        }
        self.pending.lock().await.remove(&index);
        result
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size;
        let size = self.inner.size();
        if offset >= size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size,
                size,
            });
        }
        let len = self.block_size.min(size - offset) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let first = offset / self.block_size;
        let last = (end - 1) / self.block_size;
        let start = (offset % self.block_size) as usize;

        if first == last {
            let block = self.block(first).await?;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        for index in first..=last {
            let block = self.block(index).await?;
            let from = if index == first { start } else { 0 };
            let to = block.len().min(from + (len - out.len()));
            out.extend_from_slice(&block[from..to]);
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
