//! Append-only archive writer.
//!
//! Tiles are collected in id order with identical payloads held once, then
//! `finalize` hands them to `pmtiles2`, which lays out header, directories
//! (splitting into leaves when the root outgrows its budget) and tile data.
//! The serialized archive is written to a temporary file next to the
//! destination and renamed into place, so a reader never observes a
//! partially written archive.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use pmtiles2::{Compression, PMTiles, TileType};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::header::ArchiveHeader;
use super::tile_id::tile_id;
use crate::error::{ArchiveError, IoError};
use crate::tile::{Bounds, TileCoord, TileFormat};

/// Tile set description recorded in the header and metadata.
#[derive(Debug, Clone)]
pub struct ArchiveProperties {
    pub tile_format: TileFormat,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Geographic extent in degrees (x = longitude, y = latitude).
    pub bounds: Bounds,
    pub attribution: String,
}

/// Counters read back from the header of a finalized archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub addressed_tiles: u64,
    pub tile_entries: u64,
    pub tile_contents: u64,
    /// Bytes of leaf directories; 0 when the root holds every entry.
    pub leaf_bytes: u64,
    pub file_size: u64,
}

/// Builds one archive. Tiles must be appended in strictly ascending id order.
pub struct ArchiveWriter {
    path: PathBuf,
    /// `(tile id, index into payloads)` in append order.
    tiles: Vec<(u64, usize)>,
    payloads: Vec<Vec<u8>>,
    by_digest: HashMap<[u8; 32], usize>,
}

fn io_err(path: &Path) -> impl Fn(io::Error) -> ArchiveError + '_ {
    move |e| ArchiveError::Io(IoError::from_std(path, e))
}

fn encode_err(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Encode(e.to_string())
}

fn pmtiles_tile_type(format: TileFormat) -> TileType {
    match format {
        TileFormat::Png => TileType::Png,
        TileFormat::Webp => TileType::WebP,
    }
}

impl ArchiveWriter {
    /// Start an archive that will be published at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        Ok(Self {
            path,
            tiles: Vec::new(),
            payloads: Vec::new(),
            by_digest: HashMap::new(),
        })
    }

    /// Destination path of the finished archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of tiles appended so far.
    pub fn tile_count(&self) -> u64 {
        self.tiles.len() as u64
    }

    /// Number of distinct payloads appended so far.
    pub fn unique_payloads(&self) -> usize {
        self.payloads.len()
    }

    /// Append a tile by coordinate.
    pub fn append_tile(&mut self, coord: &TileCoord, data: &[u8]) -> Result<(), ArchiveError> {
        self.append(tile_id(coord), data)
    }

    /// Append a tile payload under `id`.
    ///
    /// Payloads are keyed by SHA-256 and kept once; consecutive ids sharing
    /// a payload end up as a single run-length entry on disk.
    ///
    /// # Errors
    /// `OutOfOrder` if `id` is not greater than the previously appended id.
    pub fn append(&mut self, id: u64, data: &[u8]) -> Result<(), ArchiveError> {
        if let Some(&(last_id, _)) = self.tiles.last() {
            if id <= last_id {
                return Err(ArchiveError::OutOfOrder {
                    tile_id: id,
                    last_id,
                });
            }
        }

        let digest: [u8; 32] = Sha256::digest(data).into();
        let index = match self.by_digest.get(&digest) {
            Some(&index) => index,
            None => {
                self.payloads.push(data.to_vec());
                self.by_digest.insert(digest, self.payloads.len() - 1);
                self.payloads.len() - 1
            }
        };
        self.tiles.push((id, index));
        Ok(())
    }

    /// Serialize the archive and atomically move it to its final path.
    ///
    /// # Errors
    /// `Empty` if no tile was appended; `Encode` or I/O errors otherwise. On
    /// error the destination path is left untouched.
    pub fn finalize(self, props: &ArchiveProperties) -> Result<ArchiveSummary, ArchiveError> {
        if self.tiles.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let mut pm = PMTiles::new(pmtiles_tile_type(props.tile_format), Compression::None);
        pm.min_zoom = props.min_zoom;
        pm.max_zoom = props.max_zoom;
        pm.min_longitude = props.bounds.min_x;
        pm.min_latitude = props.bounds.min_y;
        pm.max_longitude = props.bounds.max_x;
        pm.max_latitude = props.bounds.max_y;
        pm.center_zoom = ((u16::from(props.min_zoom) + u16::from(props.max_zoom)) / 2) as u8;
        pm.center_longitude = (props.bounds.min_x + props.bounds.max_x) / 2.0;
        pm.center_latitude = (props.bounds.min_y + props.bounds.max_y) / 2.0;
        pm.meta_data
            .insert("attribution".into(), json!(props.attribution));

        for &(id, index) in &self.tiles {
            pm.add_tile(id, self.payloads[index].clone())
                .map_err(encode_err)?;
        }

        let mut buffer = Cursor::new(Vec::new());
        pm.to_writer(&mut buffer).map_err(encode_err)?;
        let bytes = buffer.into_inner();
        let header = ArchiveHeader::parse(&bytes, bytes.len() as u64)?;

        let path = self.path;
        let dir = parent_dir(&path);
        let staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
        {
            let mut out = staged.as_file();
            out.write_all(&bytes).map_err(io_err(&path))?;
            out.flush().map_err(io_err(&path))?;
        }
        staged.as_file().sync_all().map_err(io_err(&path))?;
        staged
            .persist(&path)
            .map_err(|e| ArchiveError::Io(IoError::from_std(&path, e.error)))?;

        debug!(
            path = %path.display(),
            tiles = header.addressed_tiles,
            entries = header.tile_entries,
            contents = header.tile_contents,
            leaf_bytes = header.leaf_length,
            bytes = bytes.len(),
            "Archive finalized"
        );

        Ok(ArchiveSummary {
            path,
            addressed_tiles: header.addressed_tiles,
            tile_entries: header.tile_entries,
            tile_contents: header.tile_contents,
            leaf_bytes: header.leaf_length,
            file_size: bytes.len() as u64,
        })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
