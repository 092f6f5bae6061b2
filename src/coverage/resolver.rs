//! Per-cell source resolution.
//!
//! Turns the catalog's leaves into one [`CellPlan`] per aggregation cell:
//! which sources contribute, with which leaves, in precedence order, and
//! whether the cell needs blending at all.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use super::catalog::{Catalog, LeafTile};
use super::manifest::{CellKind, CellPlan, CoverageManifest, ManifestEntry, ManifestItem};
use crate::error::CatalogError;
use crate::raster::TARGET_CRS;
use crate::tile::{tiles_covering, TileCoord, TILE_SIZE};

/// Zoom of the aggregation cells.
pub const DEFAULT_AGGREGATION_ZOOM: u8 = 9;

/// Margin around each cell in which sources are blended, in metres.
pub const DEFAULT_BUFFER_METERS: f64 = 2000.0;

/// Largest cell raster side a coalesced cell may have, in pixels.
pub const DEFAULT_MAX_CELL_PIXELS: u64 = 16384;

/// Shallowest zoom a coalesced cell may reach.
pub const DEFAULT_MIN_COALESCE_ZOOM: u8 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub aggregation_zoom: u8,
    pub buffer_m: f64,
    pub max_cell_pixels: u64,
    pub min_coalesce_zoom: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            aggregation_zoom: DEFAULT_AGGREGATION_ZOOM,
            buffer_m: DEFAULT_BUFFER_METERS,
            max_cell_pixels: DEFAULT_MAX_CELL_PIXELS,
            min_coalesce_zoom: DEFAULT_MIN_COALESCE_ZOOM,
        }
    }
}

// =============================================================================
// Overlaps
// =============================================================================

/// Leaves that overlap a leaf of another source.
#[derive(Debug, Clone, Default)]
pub struct OverlapSet {
    dirty: HashSet<(String, TileCoord)>,
}

impl OverlapSet {
    pub fn is_dirty(&self, source: &str, coord: &TileCoord) -> bool {
        self.dirty.contains(&(source.to_string(), *coord))
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}

/// Mark every leaf that overlaps a leaf of a different source.
///
/// Two leaves overlap when the deeper one, projected to the shallower one's
/// zoom, lands on it. Each leaf checks its own address, its ancestors and
/// its descendants, so the work is linear in the number of leaves times the
/// zoom depth.
pub fn detect_overlaps(leaves: &[LeafTile]) -> OverlapSet {
    let mut at: HashMap<TileCoord, BTreeSet<&str>> = HashMap::new();
    let mut below: HashMap<TileCoord, BTreeSet<&str>> = HashMap::new();

    for leaf in leaves {
        at.entry(leaf.coord).or_default().insert(&leaf.source);
        for z in 0..leaf.coord.z {
            if let Some(ancestor) = leaf.coord.ancestor_at(z) {
                below.entry(ancestor).or_default().insert(&leaf.source);
            }
        }
    }

    let mut overlaps = OverlapSet::default();
    for leaf in leaves {
        let own = leaf.source.as_str();
        let hit = (0..=leaf.coord.z).any(|z| {
            leaf.coord
                .ancestor_at(z)
                .is_some_and(|a| has_other_source(at.get(&a), own))
        }) || has_other_source(below.get(&leaf.coord), own);

        if hit {
            overlaps.dirty.insert((leaf.source.clone(), leaf.coord));
        }
    }
    overlaps
}

fn has_other_source(sources: Option<&BTreeSet<&str>>, own: &str) -> bool {
    sources.is_some_and(|s| s.iter().any(|&name| name != own))
}

// =============================================================================
// Classification
// =============================================================================

/// True iff the manifest is one source with one leaf at the cell's address,
/// stored in the target CRS. Leaves in any other CRS must be reprojected.
pub fn assign_direct_copy(
    catalog: &Catalog,
    cell: &TileCoord,
    manifest: &CoverageManifest,
) -> bool {
    let [entry] = manifest.entries() else {
        return false;
    };
    let [item] = entry.items.as_slice() else {
        return false;
    };
    if (item.z, item.x, item.y) != (cell.z, cell.x, cell.y) {
        return false;
    }
    catalog
        .leaf(&entry.source, &item.collection_id, cell)
        .is_some_and(|leaf| leaf.crs == TARGET_CRS)
}

fn classify(
    catalog: &Catalog,
    cell: &TileCoord,
    manifest: &CoverageManifest,
    overlaps: &OverlapSet,
) -> CellKind {
    if assign_direct_copy(catalog, cell, manifest) {
        return CellKind::DirectCopy;
    }
    let dirty = manifest.entries().iter().any(|entry| {
        entry.items.iter().any(|item| {
            item.coord()
                .is_ok_and(|coord| overlaps.is_dirty(&entry.source, &coord))
        })
    });
    if manifest.source_count() > 1 || dirty {
        CellKind::Blend
    } else {
        CellKind::SingleSource
    }
}

/// Finest native zoom among the manifest's sources, never shallower than the
/// cell itself.
pub fn cell_max_zoom(catalog: &Catalog, cell: &TileCoord, manifest: &CoverageManifest) -> u8 {
    manifest
        .entries()
        .iter()
        .filter_map(|e| catalog.source(&e.source).map(|s| s.max_zoom()))
        .max()
        .unwrap_or(cell.z)
        .max(cell.z)
}

/// Side of a cell raster at `cell_zoom` rendered at `max_zoom`, in pixels.
pub fn cell_raster_side(cell_zoom: u8, max_zoom: u8) -> u64 {
    let base = TILE_SIZE as u64;
    let shift = u32::from(max_zoom.saturating_sub(cell_zoom));
    if shift >= base.leading_zeros() {
        return u64::MAX;
    }
    base << shift
}

// =============================================================================
// Manifests
// =============================================================================

/// Build the manifest of every aggregation cell touched by a leaf.
pub fn build_manifests(
    catalog: &Catalog,
    leaves: &[LeafTile],
    overlaps: &OverlapSet,
    config: &ResolverConfig,
) -> BTreeMap<TileCoord, CellPlan> {
    let agg = config.aggregation_zoom;

    let mut exact: HashMap<TileCoord, Vec<usize>> = HashMap::new();
    let mut finer: HashMap<TileCoord, Vec<usize>> = HashMap::new();
    let mut candidates: BTreeSet<TileCoord> = BTreeSet::new();

    for (idx, leaf) in leaves.iter().enumerate() {
        exact.entry(leaf.coord).or_default().push(idx);
        if leaf.coord.z > agg {
            if let Some(cell) = leaf.coord.ancestor_at(agg) {
                finer.entry(cell).or_default().push(idx);
                candidates.insert(cell);
            }
        } else {
            candidates.extend(leaf.coord.descendants_at(agg));
        }
    }

    let mut plans = BTreeMap::new();
    for cell in candidates {
        let extent = cell.xy_bounds().buffered(config.buffer_m);

        let mut found: BTreeSet<usize> = BTreeSet::new();
        for neighbour in tiles_covering(&extent, agg) {
            for z in 0..=agg {
                if let Some(hits) = neighbour.ancestor_at(z).and_then(|a| exact.get(&a)) {
                    found.extend(hits);
                }
            }
            if let Some(hits) = finer.get(&neighbour) {
                found.extend(hits);
            }
        }

        let mut contributing: Vec<&LeafTile> = found
            .into_iter()
            .map(|idx| &leaves[idx])
            .filter(|leaf| leaf.coord.xy_bounds().intersects(&extent))
            .collect();
        contributing.sort_by_key(|leaf| (catalog.rank(&leaf.source), leaf.coord));

        let manifest = group_by_source(&contributing);
        if manifest.is_empty() {
            continue;
        }
        let kind = classify(catalog, &cell, &manifest, overlaps);
        plans.insert(
            cell,
            CellPlan {
                cell,
                manifest,
                kind,
            },
        );
    }
    plans
}

fn group_by_source(leaves: &[&LeafTile]) -> CoverageManifest {
    let mut entries: Vec<ManifestEntry> = Vec::new();
    for leaf in leaves {
        match entries.last_mut() {
            Some(entry) if entry.source == leaf.source => {
                entry.items.push(ManifestItem::from_leaf(leaf));
            }
            _ => entries.push(ManifestEntry {
                source: leaf.source.clone(),
                items: vec![ManifestItem::from_leaf(leaf)],
            }),
        }
    }
    CoverageManifest::new(entries)
}

// =============================================================================
// Coalescing
// =============================================================================

/// Replace four siblings with identical manifests by their parent, level by
/// level, while the parent stays within the zoom floor and raster size cap.
pub fn coalesce(
    mut plans: BTreeMap<TileCoord, CellPlan>,
    catalog: &Catalog,
    overlaps: &OverlapSet,
    config: &ResolverConfig,
) -> BTreeMap<TileCoord, CellPlan> {
    let mut zoom = config.aggregation_zoom;
    while zoom > config.min_coalesce_zoom {
        let mut families: BTreeMap<TileCoord, Vec<TileCoord>> = BTreeMap::new();
        for cell in plans.keys().filter(|c| c.z == zoom) {
            if let Some(parent) = cell.parent() {
                families.entry(parent).or_default().push(*cell);
            }
        }

        let mut merged = 0usize;
        for (parent, children) in families {
            if children.len() != 4 {
                continue;
            }
            let Some(first) = plans.get(&children[0]) else {
                continue;
            };
            let manifest = first.manifest.clone();
            let canonical = manifest.canonical_bytes();
            let identical = children[1..].iter().all(|c| {
                plans
                    .get(c)
                    .is_some_and(|p| p.manifest.canonical_bytes() == canonical)
            });
            if !identical {
                continue;
            }
            let max_zoom = cell_max_zoom(catalog, &parent, &manifest);
            if cell_raster_side(parent.z, max_zoom) > config.max_cell_pixels {
                continue;
            }

            for child in &children {
                plans.remove(child);
            }
            let kind = classify(catalog, &parent, &manifest, overlaps);
            plans.insert(
                parent,
                CellPlan {
                    cell: parent,
                    manifest,
                    kind,
                },
            );
            merged += 1;
        }

        debug!(zoom = zoom - 1, merged, "Coalesced sibling cells");
        if merged == 0 {
            break;
        }
        zoom -= 1;
    }
    plans
}

// =============================================================================
// Resolve
// =============================================================================

/// Resolve the whole catalog into cell plans.
pub fn resolve(catalog: &Catalog, config: &ResolverConfig) -> Result<Vec<CellPlan>, CatalogError> {
    let leaves = catalog.leaves()?;
    let overlaps = detect_overlaps(&leaves);
    let plans = build_manifests(catalog, &leaves, &overlaps, config);
    let built = plans.len();
    let plans = coalesce(plans, catalog, &overlaps, config);

    info!(
        leaves = leaves.len(),
        overlapping = overlaps.len(),
        cells = built,
        coalesced_cells = plans.len(),
        "Resolved coverage"
    );
    Ok(plans.into_values().collect())
}
