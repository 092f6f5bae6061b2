//! The source catalog on disk.
//!
//! ```text
//! {catalog}/{source}/{collection_id}/collection.json
//! {catalog}/{source}/{collection_id}/{z}-{x}-{y}.tiff
//! ```
//!
//! A source is a directory of collections; each collection is one delivery
//! of that source. Only complete collections are used, and for each leaf
//! address the newest complete collection that holds it wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CatalogError, IoError};
use crate::tile::TileCoord;

/// File describing one collection.
pub const COLLECTION_FILE: &str = "collection.json";

/// One leaf entry of a `collection.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub x: u32,
    pub y: u32,
    pub z: u8,
    #[serde(default)]
    pub contains_nodata: bool,
}

/// Parsed `collection.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub created: DateTime<Utc>,
    pub crs: String,
    pub max_zoom: u8,
    pub complete: bool,
    pub items: Vec<CollectionItem>,
}

/// Finest-grain raster unit of one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeafTile {
    pub source: String,
    pub collection_id: String,
    pub coord: TileCoord,
    pub contains_nodata: bool,
    pub crs: String,
    pub path: PathBuf,
}

/// A named dataset with its usable collections, oldest first.
#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    collections: Vec<Collection>,
}

impl Source {
    /// Build a source from its collections. Incomplete collections are
    /// dropped; the rest are ordered by creation time.
    pub fn new(name: impl Into<String>, collections: Vec<Collection>) -> Self {
        let name = name.into();
        let mut collections: Vec<Collection> =
            collections.into_iter().filter(|c| c.complete).collect();
        collections.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Self { name, collections }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Native maximum zoom: the deepest zoom of any usable collection.
    pub fn max_zoom(&self) -> u8 {
        self.collections.iter().map(|c| c.max_zoom).max().unwrap_or(0)
    }
}

/// Orders sources least important first.
///
/// Lower `max_zoom` is less important; for equal zoom, the name later in the
/// alphabet is less important.
fn rank_order(a: &Source, b: &Source) -> std::cmp::Ordering {
    a.max_zoom()
        .cmp(&b.max_zoom())
        .then_with(|| b.name.cmp(&a.name))
}

/// All sources of a catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    /// Least important first.
    sources: Vec<Source>,
}

impl Catalog {
    /// Assemble a catalog from already-parsed sources.
    pub fn new(root: impl Into<PathBuf>, sources: Vec<Source>) -> Result<Self, CatalogError> {
        let root = root.into();
        let mut sources: Vec<Source> = sources
            .into_iter()
            .filter(|s| !s.collections.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(CatalogError::Empty(root.display().to_string()));
        }
        sources.sort_by(rank_order);
        Ok(Self { root, sources })
    }

    /// Load every source below `root`.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let root = root.into();
        let mut sources = Vec::new();

        for source_dir in sorted_subdirs(&root)? {
            let Some(name) = dir_name(&source_dir) else {
                continue;
            };
            let mut collections = Vec::new();
            for collection_dir in sorted_subdirs(&source_dir)? {
                let file = collection_dir.join(COLLECTION_FILE);
                if !file.is_file() {
                    continue;
                }
                let collection = read_collection(&file)?;
                if !collection.complete {
                    warn!(
                        source = %name,
                        collection = %collection.id,
                        "Skipping incomplete collection"
                    );
                    continue;
                }
                collections.push(collection);
            }
            if collections.is_empty() {
                warn!(source = %name, "Source has no complete collections");
                continue;
            }
            debug!(source = %name, collections = collections.len(), "Loaded source");
            sources.push(Source::new(name, collections));
        }

        Self::new(root, sources)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sources, least important first.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Position of `name` in rank order (0 = least important).
    pub fn rank(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Raster file of a leaf.
    pub fn leaf_path(&self, source: &str, collection_id: &str, coord: &TileCoord) -> PathBuf {
        self.root
            .join(source)
            .join(collection_id)
            .join(format!("{}.tiff", coord.name()))
    }

    /// The leaves of every source, newest complete collection per address,
    /// in rank order then address order.
    pub fn leaves(&self) -> Result<Vec<LeafTile>, CatalogError> {
        let mut leaves = Vec::new();
        for source in &self.sources {
            let mut by_coord: BTreeMap<TileCoord, LeafTile> = BTreeMap::new();
            // Oldest first, so newer collections overwrite
            for collection in &source.collections {
                for item in &collection.items {
                    let coord = TileCoord::new(item.z, item.x, item.y)?;
                    by_coord.insert(
                        coord,
                        LeafTile {
                            source: source.name.clone(),
                            collection_id: collection.id.clone(),
                            coord,
                            contains_nodata: item.contains_nodata,
                            crs: collection.crs.clone(),
                            path: self.leaf_path(&source.name, &collection.id, &coord),
                        },
                    );
                }
            }
            leaves.extend(by_coord.into_values());
        }
        Ok(leaves)
    }

    /// Look up one leaf by its manifest reference.
    pub fn leaf(&self, source: &str, collection_id: &str, coord: &TileCoord) -> Option<LeafTile> {
        let source = self.source(source)?;
        let collection = source.collections.iter().find(|c| c.id == collection_id)?;
        let item = collection
            .items
            .iter()
            .find(|i| i.z == coord.z && i.x == coord.x && i.y == coord.y)?;
        Some(LeafTile {
            source: source.name.clone(),
            collection_id: collection.id.clone(),
            coord: *coord,
            contains_nodata: item.contains_nodata,
            crs: collection.crs.clone(),
            path: self.leaf_path(&source.name, &collection.id, coord),
        })
    }
}

fn read_collection(path: &Path) -> Result<Collection, CatalogError> {
    let bytes = fs::read(path).map_err(|e| IoError::from_std(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| CatalogError::InvalidCollection {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let entries = fs::read_dir(dir).map_err(|e| IoError::from_std(dir, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IoError::from_std(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}
