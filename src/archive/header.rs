//! Fixed-size archive header, as read back from disk.
//!
//! # Layout (127 bytes, little-endian)
//!
//! ```text
//! Bytes   0-6:   Magic "PMTiles"
//! Byte      7:   Spec version (3)
//! Bytes  8-71:   Root dir, metadata, leaf dirs, tile data (offset u64, length u64 each)
//! Bytes 72-95:   Addressed tiles, tile entries, tile contents (u64 each)
//! Byte     96:   Clustered flag
//! Bytes 97-99:   Internal compression, tile compression, tile type
//! Bytes 100-101: Min zoom, max zoom
//! Bytes 102-117: Min lon, min lat, max lon, max lat (i32, degrees · 1e7)
//! Byte    118:   Center zoom
//! Bytes 119-126: Center lon, center lat (i32, degrees · 1e7)
//! ```

use serde::Serialize;

use crate::error::ArchiveError;
use crate::io::le_at;

// =============================================================================
// Constants
// =============================================================================

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = 127;

/// Magic bytes at the start of every archive.
const MAGIC: &[u8; 7] = b"PMTiles";

/// Supported spec version.
const VERSION: u8 = 3;

/// Compression codes shared by internal and tile compression fields.
pub const COMPRESSION_NONE: u8 = 1;
pub const COMPRESSION_GZIP: u8 = 2;

// =============================================================================
// ArchiveHeader
// =============================================================================

/// Parsed archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveHeader {
    pub root_offset: u64,
    pub root_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_offset: u64,
    pub leaf_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub addressed_tiles: u64,
    pub tile_entries: u64,
    pub tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: u8,
    pub tile_compression: u8,
    pub tile_type: u8,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon_e7: i32,
    pub min_lat_e7: i32,
    pub max_lon_e7: i32,
    pub max_lat_e7: i32,
    pub center_zoom: u8,
    pub center_lon_e7: i32,
    pub center_lat_e7: i32,
}

impl ArchiveHeader {
    /// Parse a header from the first bytes of an archive.
    ///
    /// # Arguments
    /// * `bytes` - At least [`HEADER_SIZE`] bytes from offset 0
    /// * `file_size` - Total archive size, used to reject sections past EOF
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 127 bytes are available
    /// - `InvalidMagic` if the file does not start with "PMTiles"
    /// - `UnsupportedVersion` for anything but version 3
    /// - `CorruptDirectory` if a section points outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, ArchiveError> {
        if bytes.len() < HEADER_SIZE || file_size < HEADER_SIZE as u64 {
            return Err(ArchiveError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: (bytes.len() as u64).min(file_size),
            });
        }
        if &bytes[0..7] != MAGIC {
            return Err(ArchiveError::InvalidMagic);
        }
        if bytes[7] != VERSION {
            return Err(ArchiveError::UnsupportedVersion(bytes[7]));
        }

        let u64_at = |offset: usize| le_at::<u64>(bytes, offset);
        let i32_at = |offset: usize| le_at::<i32>(bytes, offset);

        let header = Self {
            root_offset: u64_at(8),
            root_length: u64_at(16),
            metadata_offset: u64_at(24),
            metadata_length: u64_at(32),
            leaf_offset: u64_at(40),
            leaf_length: u64_at(48),
            tile_data_offset: u64_at(56),
            tile_data_length: u64_at(64),
            addressed_tiles: u64_at(72),
            tile_entries: u64_at(80),
            tile_contents: u64_at(88),
            clustered: bytes[96] == 1,
            internal_compression: bytes[97],
            tile_compression: bytes[98],
            tile_type: bytes[99],
            min_zoom: bytes[100],
            max_zoom: bytes[101],
            min_lon_e7: i32_at(102),
            min_lat_e7: i32_at(106),
            max_lon_e7: i32_at(110),
            max_lat_e7: i32_at(114),
            center_zoom: bytes[118],
            center_lon_e7: i32_at(119),
            center_lat_e7: i32_at(123),
        };

        for (name, offset, length) in [
            ("root directory", header.root_offset, header.root_length),
            ("metadata", header.metadata_offset, header.metadata_length),
            ("leaf directories", header.leaf_offset, header.leaf_length),
            ("tile data", header.tile_data_offset, header.tile_data_length),
        ] {
            if offset.saturating_add(length) > file_size {
                return Err(ArchiveError::CorruptDirectory(format!(
                    "{name} section {offset}+{length} extends past end of file ({file_size} bytes)"
                )));
            }
        }

        Ok(header)
    }
}
