//! The `inspect` command: summarize an archive.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::{tile_coord, ArchiveHeader, ArchiveReader};
use crate::error::{ArchiveError, PipelineError};
use crate::io::LocalFileReader;

/// Header, metadata and per-zoom tile counts of an archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub path: String,
    pub header: ArchiveHeader,
    pub metadata: serde_json::Value,
    /// Addressed tiles per zoom level.
    pub tiles_per_zoom: BTreeMap<u8, u64>,
}

pub async fn inspect(path: &Path) -> Result<ArchiveReport, PipelineError> {
    let reader = LocalFileReader::open(path).await?;
    let archive = ArchiveReader::open(Arc::new(reader)).await?;

    let mut tiles_per_zoom = BTreeMap::new();
    for entry in archive.entries().await? {
        for id in entry.tile_id..entry.tile_id + u64::from(entry.run_length) {
            let coord = tile_coord(id).map_err(ArchiveError::from)?;
            *tiles_per_zoom.entry(coord.z).or_insert(0) += 1;
        }
    }

    Ok(ArchiveReport {
        path: path.display().to_string(),
        header: *archive.header(),
        metadata: archive.metadata().await?,
        tiles_per_zoom,
    })
}
