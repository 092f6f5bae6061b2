//! Which archives feed which downsample extent.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DownsampleError, IoError};
use crate::store::{write_json_atomic, RunId, StoreLayout};
use crate::tile::{overlaps, TileCoord};

/// Default number of zooms between a downsample extent and its parent tiles.
pub const DEFAULT_EXTENT_DEPTH: u8 = 3;

/// An archive providing child tiles to a downsample extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildArchive {
    pub run_id: String,
    /// The archive holds descendants of this tile.
    pub tile: TileCoord,
    /// File name inside the run directory.
    pub file: String,
}

impl ChildArchive {
    /// Identifier relative to the store root, as understood by
    /// [`crate::archive::LocalArchiveSource`].
    pub fn archive_id(&self) -> String {
        format!("{}/{}", self.run_id, self.file)
    }

    pub fn covers(&self, child: &TileCoord) -> bool {
        self.tile.contains(child)
    }
}

/// Work order of one extent: the parents to build and where their children
/// live. Archives are listed newest run first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampleManifest {
    pub extent: TileCoord,
    pub parent_zoom: u8,
    pub archives: Vec<ChildArchive>,
}

impl DownsampleManifest {
    pub fn child_zoom(&self) -> u8 {
        self.parent_zoom + 1
    }

    /// Parent tiles of the extent, row by row.
    pub fn parents(&self) -> impl Iterator<Item = TileCoord> {
        self.extent.descendants_at(self.parent_zoom)
    }

    /// Newest archive covering `child`.
    pub fn archive_for(&self, child: &TileCoord) -> Option<&ChildArchive> {
        self.archives.iter().find(|a| a.covers(child))
    }

    pub fn load(path: &Path) -> Result<Self, DownsampleError> {
        let bytes = fs::read(path).map_err(|e| IoError::from_std(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DownsampleError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IoError> {
        write_json_atomic(path, self)
    }
}

/// Zoom of the extents that hold parents at `parent_zoom`.
pub fn extent_zoom(parent_zoom: u8, depth: u8) -> u8 {
    parent_zoom.saturating_sub(depth)
}

/// Archives holding tiles at `child_zoom` visible from `run`.
///
/// Runs up to and including `run` are scanned; for each archive tile the
/// latest run wins. At the aggregation zoom the children come from cell
/// archives, below it from the previous downsample level.
pub fn child_archives(
    store: &StoreLayout,
    run: &RunId,
    child_zoom: u8,
    aggregation_zoom: u8,
) -> Result<Vec<ChildArchive>, IoError> {
    let mut latest: BTreeMap<TileCoord, RunId> = BTreeMap::new();
    for r in store.list_runs()?.into_iter().filter(|r| r <= run) {
        let tiles = if child_zoom == aggregation_zoom {
            store.archive_cells(&r)?
        } else {
            store.downsample_extents(&r, child_zoom)?
        };
        for tile in tiles {
            latest.insert(tile, r.clone());
        }
    }

    let mut archives: Vec<ChildArchive> = latest
        .into_iter()
        .map(|(tile, r)| {
            let file = if child_zoom == aggregation_zoom {
                format!("{}.pmtiles", tile.name())
            } else {
                format!("{}-{}.pmtiles", tile.name(), child_zoom)
            };
            ChildArchive {
                run_id: r.to_string(),
                tile,
                file,
            }
        })
        .collect();
    archives.sort_by(|a, b| b.run_id.cmp(&a.run_id).then(b.tile.z.cmp(&a.tile.z)));
    Ok(archives)
}

/// Extents at `zoom` that `tile` touches.
fn extents_of(tile: &TileCoord, zoom: u8) -> Vec<TileCoord> {
    match tile.ancestor_at(zoom) {
        Some(extent) => vec![extent],
        None => tile.descendants_at(zoom).collect(),
    }
}

/// Manifests of the extents at `parent_zoom` that need rebuilding in `run`.
///
/// An extent is dirty when any of its child archives belongs to `run`.
pub fn plan_level(
    store: &StoreLayout,
    run: &RunId,
    parent_zoom: u8,
    aggregation_zoom: u8,
    depth: u8,
) -> Result<Vec<DownsampleManifest>, IoError> {
    let archives = child_archives(store, run, parent_zoom + 1, aggregation_zoom)?;
    let zoom = extent_zoom(parent_zoom, depth);

    let dirty: BTreeSet<TileCoord> = archives
        .iter()
        .filter(|a| a.run_id == run.as_str())
        .flat_map(|a| extents_of(&a.tile, zoom))
        .collect();

    Ok(dirty
        .into_iter()
        .map(|extent| DownsampleManifest {
            extent,
            parent_zoom,
            archives: archives
                .iter()
                .filter(|a| overlaps(&a.tile, &extent))
                .cloned()
                .collect(),
        })
        .collect())
}
