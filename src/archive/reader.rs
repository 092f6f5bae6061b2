//! Random-access archive reader.
//!
//! Reads are issued through a [`RangeReader`], so only the header, the
//! directories on the lookup path and the requested tile payload are
//! fetched. Leaf directories are kept in a small LRU once decoded.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use super::directory::{decode_entries, decompress, find_entry, DirEntry};
use super::header::{ArchiveHeader, HEADER_SIZE};
use super::tile_id::{tile_coord, tile_id};
use crate::error::ArchiveError;
use crate::io::RangeReader;
use crate::tile::{TileCoord, TileFormat};

/// Decoded leaf directories kept per archive.
const LEAF_CACHE_CAPACITY: usize = 64;

/// Maximum directory nesting followed before giving up.
const MAX_DIRECTORY_DEPTH: usize = 4;

pub struct ArchiveReader<R> {
    reader: Arc<R>,
    header: ArchiveHeader,
    root: Arc<Vec<DirEntry>>,
    leaves: Mutex<LruCache<u64, Arc<Vec<DirEntry>>>>,
}

impl<R: RangeReader> ArchiveReader<R> {
    /// Parse the header and root directory.
    pub async fn open(reader: Arc<R>) -> Result<Self, ArchiveError> {
        let size = reader.size();
        if size < HEADER_SIZE as u64 {
            return Err(ArchiveError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: size,
            });
        }

        let header_bytes = reader.read_exact_at(0, HEADER_SIZE).await?;
        let header = ArchiveHeader::parse(&header_bytes, size)?;

        let root_bytes = reader
            .read_exact_at(header.root_offset, header.root_length as usize)
            .await?;
        let root = Arc::new(decode_entries(header.internal_compression, &root_bytes)?);

        Ok(Self {
            reader,
            header,
            root,
            leaves: Mutex::new(LruCache::new(
                NonZeroUsize::new(LEAF_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Tile image container, if the header names a known one.
    pub fn tile_format(&self) -> Option<TileFormat> {
        TileFormat::from_tile_type(self.header.tile_type)
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Fetch the payload of a tile, or `None` if the archive lacks it.
    pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<Bytes>, ArchiveError> {
        self.get_tile_by_id(tile_id(coord)).await
    }

    /// Fetch the payload stored under a tile id.
    pub async fn get_tile_by_id(&self, id: u64) -> Result<Option<Bytes>, ArchiveError> {
        let mut directory = self.root.clone();
        for _ in 0..MAX_DIRECTORY_DEPTH {
            let Some(entry) = find_entry(&directory, id) else {
                return Ok(None);
            };
            if !entry.is_leaf_pointer() {
                let data = self
                    .reader
                    .read_exact_at(
                        self.header.tile_data_offset + entry.offset,
                        entry.length as usize,
                    )
                    .await?;
                return Ok(Some(data));
            }
            directory = self.leaf(&entry).await?;
        }
        Err(ArchiveError::CorruptDirectory(format!(
            "directory nesting deeper than {MAX_DIRECTORY_DEPTH} levels"
        )))
    }

    /// Parsed JSON metadata.
    pub async fn metadata(&self) -> Result<serde_json::Value, ArchiveError> {
        let raw = self
            .reader
            .read_exact_at(
                self.header.metadata_offset,
                self.header.metadata_length as usize,
            )
            .await?;
        let json = decompress(self.header.internal_compression, &raw)?;
        serde_json::from_slice(&json)
            .map_err(|e| ArchiveError::CorruptDirectory(format!("invalid metadata JSON: {e}")))
    }

    /// All tile entries, leaf directories flattened, in tile id order.
    pub async fn entries(&self) -> Result<Vec<DirEntry>, ArchiveError> {
        let mut out = Vec::new();
        let mut stack: Vec<(Arc<Vec<DirEntry>>, usize)> = vec![(self.root.clone(), 0)];

        while let Some((dir, depth)) = stack.pop() {
            if depth >= MAX_DIRECTORY_DEPTH {
                return Err(ArchiveError::CorruptDirectory(format!(
                    "directory nesting deeper than {MAX_DIRECTORY_DEPTH} levels"
                )));
            }
            // Push leaves in reverse so they pop in id order
            let mut pending = Vec::new();
            for entry in dir.iter() {
                if entry.is_leaf_pointer() {
                    pending.push(*entry);
                } else {
                    out.push(*entry);
                }
            }
            for entry in pending.iter().rev() {
                stack.push((self.leaf(entry).await?, depth + 1));
            }
        }

        out.sort_by_key(|e| e.tile_id);
        Ok(out)
    }

    /// Coordinates of every addressed tile (runs expanded).
    pub async fn tile_coords(&self) -> Result<Vec<TileCoord>, ArchiveError> {
        let mut coords = Vec::new();
        for entry in self.entries().await? {
            for id in entry.tile_id..entry.tile_id + u64::from(entry.run_length) {
                coords.push(tile_coord(id)?);
            }
        }
        Ok(coords)
    }

    async fn leaf(&self, pointer: &DirEntry) -> Result<Arc<Vec<DirEntry>>, ArchiveError> {
        let offset = self.header.leaf_offset + pointer.offset;
        {
            let mut cache = self.leaves.lock().await;
            if let Some(dir) = cache.get(&offset) {
                return Ok(dir.clone());
            }
        }

        let bytes = self
            .reader
            .read_exact_at(offset, pointer.length as usize)
            .await?;
        let dir = Arc::new(decode_entries(self.header.internal_compression, &bytes)?);

        let mut cache = self.leaves.lock().await;
        cache.put(offset, dir.clone());
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::{ArchiveProperties, ArchiveWriter};
    use crate::io::LocalFileReader;
    use crate::tile::Bounds;

    fn props() -> ArchiveProperties {
        ArchiveProperties {
            tile_format: TileFormat::Png,
            min_zoom: 0,
            max_zoom: 3,
            bounds: Bounds::new(-180.0, -85.0, 180.0, 85.0),
            attribution: "reader test".to_string(),
        }
    }

    async fn open(path: &std::path::Path) -> ArchiveReader<LocalFileReader> {
        let file = LocalFileReader::open(path).await.unwrap();
        ArchiveReader::open(Arc::new(file)).await.unwrap()
    }

    #[tokio::test]
    async fn test_reads_back_written_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.pmtiles");
        let mut writer = ArchiveWriter::create(&path).unwrap();

        let mut coords: Vec<TileCoord> = TileCoord::root().descendants_at(2).collect();
        coords.sort_by_key(tile_id);
        for c in &coords {
            writer.append_tile(c, c.name().as_bytes()).unwrap();
        }
        writer.finalize(&props()).unwrap();

        let reader = open(&path).await;
        assert_eq!(reader.tile_format(), Some(TileFormat::Png));
        for c in &coords {
            let data = reader.get_tile(c).await.unwrap().unwrap();
            assert_eq!(&data[..], c.name().as_bytes());
        }
        assert_eq!(reader.get_tile(&TileCoord::root()).await.unwrap(), None);
        assert_eq!(reader.metadata().await.unwrap()["attribution"], "reader test");

        let mut listed = reader.tile_coords().await.unwrap();
        listed.sort();
        let mut expected = coords.clone();
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn test_run_length_tiles_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.pmtiles");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        for id in 1..=4 {
            writer.append(id, b"ocean").unwrap();
        }
        writer.finalize(&props()).unwrap();

        let reader = open(&path).await;
        for id in 1..=4 {
            assert_eq!(&reader.get_tile_by_id(id).await.unwrap().unwrap()[..], b"ocean");
        }
        assert!(reader.get_tile_by_id(5).await.unwrap().is_none());
        assert_eq!(reader.tile_coords().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_large_archive_uses_leaf_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.pmtiles");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        // Distinct payloads of scrambled length keep the directory from
        // compressing into the root
        let len = |id: u64| 8 + (id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58) as usize;
        for id in 0..40_000u64 {
            let mut payload = id.to_le_bytes().to_vec();
            payload.resize(len(id), (id % 251) as u8);
            writer.append(id, &payload).unwrap();
        }
        let summary = writer.finalize(&props()).unwrap();
        assert!(summary.leaf_bytes > 0);

        let reader = open(&path).await;
        for id in [0u64, 1, 4_095, 4_096, 17_333, 39_999] {
            let data = reader.get_tile_by_id(id).await.unwrap().unwrap();
            assert_eq!(&data[..8], &id.to_le_bytes());
            assert_eq!(data.len(), len(id));
        }
        assert!(reader.get_tile_by_id(40_000).await.unwrap().is_none());
        assert_eq!(reader.entries().await.unwrap().len(), 40_000);
    }

    #[tokio::test]
    async fn test_rejects_non_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.pmtiles");
        std::fs::write(&path, vec![7u8; 200]).unwrap();
        let file = LocalFileReader::open(&path).await.unwrap();
        assert!(matches!(
            ArchiveReader::open(Arc::new(file)).await,
            Err(ArchiveError::InvalidMagic)
        ));
    }
}
