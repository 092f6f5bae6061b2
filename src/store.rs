//! On-disk layout of the aggregation store.
//!
//! ```text
//! {store}/{run_id}/{z}-{x}-{y}.json           coverage manifest of a dirty cell
//! {store}/{run_id}/{z}-{x}-{y}-tmp/           per-cell working directory
//!     reprojection.json, merge-done, crop-done
//! {store}/{run_id}/{z}-{x}-{y}.pmtiles        cell archive
//! {store}/{run_id}/{z}-{x}-{y}-{p}.pmtiles    downsample archive of extent z-x-y at zoom p
//! ```
//!
//! Run ids are UUIDv7 strings, so lexicographic order is creation order.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::IoError;
use crate::tile::TileCoord;

// =============================================================================
// RunId
// =============================================================================

/// Identifier of one `cover` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    /// A fresh, time-ordered run id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RunId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|e| format!("invalid run id {s:?}: {e}"))?;
        Ok(Self(id.hyphenated().to_string()))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Sentinels
// =============================================================================

/// Completion marker of a per-cell blend stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Reprojected,
    Merged,
    Cropped,
}

impl Sentinel {
    pub fn file_name(&self) -> &'static str {
        match self {
            Sentinel::Reprojected => "reprojection.json",
            Sentinel::Merged => "merge-done",
            Sentinel::Cropped => "crop-done",
        }
    }
}

/// Result of running one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The work ran and its output was published.
    Completed,
    /// The output already existed; nothing was done.
    Skipped,
}

// =============================================================================
// StoreLayout
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    pub fn manifest_path(&self, run: &RunId, cell: &TileCoord) -> PathBuf {
        self.run_dir(run).join(format!("{}.json", cell.name()))
    }

    pub fn cell_archive_path(&self, run: &RunId, cell: &TileCoord) -> PathBuf {
        self.run_dir(run).join(format!("{}.pmtiles", cell.name()))
    }

    pub fn work_dir(&self, run: &RunId, cell: &TileCoord) -> PathBuf {
        self.run_dir(run).join(format!("{}-tmp", cell.name()))
    }

    pub fn sentinel_path(&self, run: &RunId, cell: &TileCoord, sentinel: Sentinel) -> PathBuf {
        self.work_dir(run, cell).join(sentinel.file_name())
    }

    /// Archive holding zoom `parent_zoom` tiles of `extent`.
    pub fn downsample_archive_path(
        &self,
        run: &RunId,
        extent: &TileCoord,
        parent_zoom: u8,
    ) -> PathBuf {
        self.run_dir(run)
            .join(format!("{}-{}.pmtiles", extent.name(), parent_zoom))
    }

    /// Plan listing the archives an extent reads its children from.
    pub fn downsample_manifest_path(
        &self,
        run: &RunId,
        extent: &TileCoord,
        parent_zoom: u8,
    ) -> PathBuf {
        self.run_dir(run)
            .join(format!("{}-{}-downsample.json", extent.name(), parent_zoom))
    }

    /// All run ids in the store, oldest first. Entries that are not run
    /// directories are ignored.
    pub fn list_runs(&self) -> Result<Vec<RunId>, IoError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IoError::from_std(&self.root, e)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IoError::from_std(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(run) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                runs.push(run);
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Runs created before `run`, oldest first.
    pub fn prior_runs(&self, run: &RunId) -> Result<Vec<RunId>, IoError> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|r| r < run)
            .collect())
    }

    /// Cells that have a manifest in `run`.
    pub fn manifest_cells(&self, run: &RunId) -> Result<Vec<TileCoord>, IoError> {
        self.cells_with_suffix(run, ".json")
    }

    /// Cells that have a finished archive in `run`.
    pub fn archive_cells(&self, run: &RunId) -> Result<Vec<TileCoord>, IoError> {
        self.cells_with_suffix(run, ".pmtiles")
    }

    /// Extents that have a downsample archive at `parent_zoom` in `run`.
    pub fn downsample_extents(
        &self,
        run: &RunId,
        parent_zoom: u8,
    ) -> Result<Vec<TileCoord>, IoError> {
        let suffix = format!("-{parent_zoom}.pmtiles");
        let mut extents = Vec::new();
        for name in self.file_names(run)? {
            if let Some(extent) = name.strip_suffix(&suffix).and_then(|s| s.parse().ok()) {
                extents.push(extent);
            }
        }
        extents.sort();
        Ok(extents)
    }

    fn file_names(&self, run: &RunId) -> Result<Vec<String>, IoError> {
        let dir = self.run_dir(run);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IoError::from_std(&dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IoError::from_std(&dir, e))?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn cells_with_suffix(&self, run: &RunId, suffix: &str) -> Result<Vec<TileCoord>, IoError> {
        let mut cells = Vec::new();
        for name in self.file_names(run)? {
            let Some(stem) = name.strip_suffix(suffix) else {
                continue;
            };
            // Downsample outputs carry a fourth component and do not parse
            if let Ok(cell) = stem.parse::<TileCoord>() {
                cells.push(cell);
            }
        }
        cells.sort();
        Ok(cells)
    }
}

// =============================================================================
// Atomic writes
// =============================================================================

/// Write `bytes` to a temporary file beside `path`, then rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| IoError::from_std(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| IoError::from_std(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| IoError::from_std(path, e))?;
    tmp.persist(path)
        .map_err(|e| IoError::from_std(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| IoError::Filesystem {
        path: path.display().to_string(),
        message: format!("serialization failed: {e}"),
    })?;
    write_atomic(path, &json)
}

/// Record a completed stage.
pub fn mark_done(path: &Path) -> Result<(), IoError> {
    write_atomic(path, b"")
}

/// Whether a stage marker or output exists.
pub fn is_done(path: &Path) -> bool {
    path.is_file()
}

/// Remove a directory tree if present.
pub fn remove_dir_if_exists(path: &Path) -> Result<(), IoError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IoError::from_std(path, e)),
    }
}
