//! Per-cell coverage manifests.
//!
//! A manifest lists, for one aggregation cell, the contributing sources from
//! least to most important, each with the leaves it contributes. On disk:
//!
//! ```json
//! [
//!   { "source": "glo30", "items": [{ "collection_id": "...", "x": 16, "y": 11, "z": 5 }] },
//!   { "source": "swisstopo", "items": [ ... ] }
//! ]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::catalog::LeafTile;
use crate::error::{CoordError, IoError, PipelineError};
use crate::store::write_json_atomic;
use crate::tile::TileCoord;

/// Reference to one leaf tile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManifestItem {
    pub collection_id: String,
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl ManifestItem {
    pub fn from_leaf(leaf: &LeafTile) -> Self {
        Self {
            collection_id: leaf.collection_id.clone(),
            x: leaf.coord.x,
            y: leaf.coord.y,
            z: leaf.coord.z,
        }
    }

    pub fn coord(&self) -> Result<TileCoord, CoordError> {
        TileCoord::new(self.z, self.x, self.y)
    }
}

/// The leaves one source contributes to a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub source: String,
    pub items: Vec<ManifestItem>,
}

/// Ordered layer list of one cell, least important source first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageManifest {
    entries: Vec<ManifestEntry>,
}

/// Flattened leaf reference: `(source, collection_id, x, y, z)`.
type CanonicalItem<'a> = (&'a str, &'a str, u32, u32, u8);

impl CoverageManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.items.is_empty())
    }

    pub fn source_count(&self) -> usize {
        self.entries.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.entries.iter().map(|e| e.items.len()).sum()
    }

    /// Layers in fold order: most important source first.
    pub fn fold_order(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().rev()
    }

    /// Byte-exact form used to decide whether a cell changed between runs.
    ///
    /// Every leaf reference becomes a `(source, collection_id, x, y, z)` tuple;
    /// the tuples are sorted and serialized as compact JSON.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut items: Vec<CanonicalItem<'_>> = self
            .entries
            .iter()
            .flat_map(|e| {
                e.items
                    .iter()
                    .map(move |i| (e.source.as_str(), i.collection_id.as_str(), i.x, i.y, i.z))
            })
            .collect();
        items.sort_unstable();
        serde_json::to_vec(&items).unwrap_or_default()
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(path).map_err(|e| IoError::from_std(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IoError> {
        write_json_atomic(path, self)
    }
}

/// How a cell is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// One source, one leaf at the cell's own address: converted as is.
    DirectCopy,
    /// Several sources, or a leaf that overlaps another source.
    Blend,
    /// One source whose leaves overlap nothing.
    SingleSource,
}

/// A resolved cell ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct CellPlan {
    pub cell: TileCoord,
    pub manifest: CoverageManifest,
    pub kind: CellKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(collection_id: &str, z: u8, x: u32, y: u32) -> ManifestItem {
        ManifestItem {
            collection_id: collection_id.to_string(),
            x,
            y,
            z,
        }
    }

    fn manifest() -> CoverageManifest {
        CoverageManifest::new(vec![
            ManifestEntry {
                source: "glo30".to_string(),
                items: vec![item("c1", 6, 33, 22)],
            },
            ManifestEntry {
                source: "swisstopo".to_string(),
                items: vec![item("c9", 12, 2140, 1436), item("c9", 12, 2139, 1436)],
            },
        ])
    }

    #[test]
    fn test_json_layout() {
        let json = serde_json::to_value(manifest()).unwrap();
        assert_eq!(json[0]["source"], "glo30");
        assert_eq!(json[1]["items"][0]["collection_id"], "c9");
        assert_eq!(json[1]["items"][0]["x"], 2140);
    }

    #[test]
    fn test_canonical_bytes_ignore_item_order() {
        let a = manifest();
        let mut b = manifest();
        b.entries[1].items.reverse();
        assert_ne!(a, b);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());

        let mut c = manifest();
        c.entries[0].items[0].collection_id = "c2".to_string();
        assert_ne!(a.canonical_bytes(), c.canonical_bytes());
    }

    #[test]
    fn test_fold_order_is_most_important_first() {
        let m = manifest();
        let order: Vec<&str> = m.fold_order().map(|e| e.source.as_str()).collect();
        assert_eq!(order, vec!["swisstopo", "glo30"]);
        assert_eq!(m.leaf_count(), 3);
        assert_eq!(m.source_count(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("9-5-3.json");
        manifest().save(&path).unwrap();
        assert_eq!(CoverageManifest::load(&path).unwrap(), manifest());

        fs::write(&path, b"{}").unwrap();
        assert!(matches!(
            CoverageManifest::load(&path),
            Err(PipelineError::InvalidManifest { .. })
        ));
    }
}
