//! Directory decoding.
//!
//! A directory is a sorted list of entries mapping tile ids to byte ranges in
//! the tile data section, stored column-wise as unsigned LEB128 varints and
//! compressed with the archive's internal compression:
//!
//! ```text
//! entry count
//! tile ids        (delta-encoded from the previous entry)
//! run lengths     (0 marks a pointer to a leaf directory)
//! lengths
//! offsets         (0 = contiguous with the previous entry, else offset + 1)
//! ```
//!
//! Archives are serialized by `pmtiles2`; this side only reads them, over a
//! range reader rather than a whole-file `Read + Seek`.

use std::io::Read;

use flate2::read::GzDecoder;

use super::header::{COMPRESSION_GZIP, COMPRESSION_NONE};
use crate::error::ArchiveError;

/// One directory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    /// Number of consecutive tile ids sharing this payload; 0 for leaf
    /// directory pointers.
    pub run_length: u32,
}

impl DirEntry {
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

fn corrupt(message: &str) -> ArchiveError {
    ArchiveError::CorruptDirectory(message.to_string())
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, ArchiveError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| corrupt("truncated varint"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(corrupt("varint overflows 64 bits"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u32, ArchiveError> {
    u32::try_from(read_varint(bytes, pos)?)
        .map_err(|_| ArchiveError::CorruptDirectory(format!("{what} overflows 32 bits")))
}

/// Decode uncompressed directory bytes.
pub fn deserialize_entries(bytes: &[u8]) -> Result<Vec<DirEntry>, ArchiveError> {
    let mut pos = 0usize;
    let count = read_varint(bytes, &mut pos)? as usize;
    if count > bytes.len() {
        return Err(ArchiveError::CorruptDirectory(format!(
            "entry count {count} exceeds directory size {}",
            bytes.len()
        )));
    }

    let mut ids = Vec::with_capacity(count);
    let mut last_id = 0u64;
    for _ in 0..count {
        last_id = last_id
            .checked_add(read_varint(bytes, &mut pos)?)
            .ok_or_else(|| corrupt("tile id overflow"))?;
        ids.push(last_id);
    }
    let runs = (0..count)
        .map(|_| read_u32(bytes, &mut pos, "run length"))
        .collect::<Result<Vec<_>, _>>()?;
    let lengths = (0..count)
        .map(|_| read_u32(bytes, &mut pos, "length"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries: Vec<DirEntry> = Vec::with_capacity(count);
    for i in 0..count {
        let raw = read_varint(bytes, &mut pos)?;
        let offset = match (raw, entries.last()) {
            (0, Some(prev)) => prev.offset + u64::from(prev.length),
            (0, None) => return Err(corrupt("first entry cannot be contiguous")),
            (raw, _) => raw - 1,
        };
        entries.push(DirEntry {
            tile_id: ids[i],
            offset,
            length: lengths[i],
            run_length: runs[i],
        });
    }
    Ok(entries)
}

/// Undo the archive's internal compression.
pub fn decompress(compression: u8, bytes: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    match compression {
        COMPRESSION_NONE => Ok(bytes.to_vec()),
        COMPRESSION_GZIP => {
            let mut out = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| ArchiveError::CorruptDirectory(format!("gunzip failed: {e}")))?;
            Ok(out)
        }
        other => Err(ArchiveError::UnsupportedCompression(other)),
    }
}

/// Decompress and parse one directory.
pub fn decode_entries(compression: u8, bytes: &[u8]) -> Result<Vec<DirEntry>, ArchiveError> {
    deserialize_entries(&decompress(compression, bytes)?)
}

/// Find the entry covering `tile_id`.
///
/// Returns either a tile entry whose run covers the id, or the leaf pointer
/// whose subtree may contain it.
pub fn find_entry(entries: &[DirEntry], tile_id: u64) -> Option<DirEntry> {
    let idx = match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(i) => return Some(entries[i]),
        Err(0) => return None,
        Err(i) => i - 1,
    };
    let e = entries[idx];
    if e.is_leaf_pointer() || tile_id - e.tile_id < u64::from(e.run_length) {
        Some(e)
    } else {
        None
    }
}
