//! The `cover` step: resolve manifests and keep only the changed cells.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use crate::coverage::{resolve, Catalog, CellPlan, CoverageManifest, ResolverConfig};
use crate::error::PipelineError;
use crate::store::{RunId, StoreLayout};
use crate::tile::TileCoord;

/// Outcome of a `cover` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverReport {
    pub run: RunId,
    /// Cells in the resolved coverage.
    pub total_cells: usize,
    /// Cells whose manifest changed and were written to the run.
    pub dirty_cells: Vec<TileCoord>,
}

/// Resolve the catalog into a new run.
///
/// A cell is dirty unless the most recent earlier run that holds a manifest
/// for it has an identical manifest and a published archive. Only dirty
/// cells get a manifest in the new run; a run without dirty cells leaves no
/// directory behind.
pub fn cover(
    catalog: &Catalog,
    store: &StoreLayout,
    config: &ResolverConfig,
) -> Result<CoverReport, PipelineError> {
    let start = Instant::now();
    let plans = resolve(catalog, config)?;
    let run = RunId::generate();

    let mut previous: HashMap<TileCoord, RunId> = HashMap::new();
    for prior in store.prior_runs(&run)? {
        for cell in store.manifest_cells(&prior)? {
            previous.insert(cell, prior.clone());
        }
    }

    let mut dirty_cells = Vec::new();
    for plan in &plans {
        if is_unchanged(store, &previous, plan)? {
            continue;
        }
        plan.manifest.save(&store.manifest_path(&run, &plan.cell))?;
        dirty_cells.push(plan.cell);
    }

    info!(
        run = %run,
        cells = plans.len(),
        dirty = dirty_cells.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Coverage resolved"
    );
    Ok(CoverReport {
        run,
        total_cells: plans.len(),
        dirty_cells,
    })
}

fn is_unchanged(
    store: &StoreLayout,
    previous: &HashMap<TileCoord, RunId>,
    plan: &CellPlan,
) -> Result<bool, PipelineError> {
    let Some(prior) = previous.get(&plan.cell) else {
        return Ok(false);
    };
    if !store.cell_archive_path(prior, &plan.cell).is_file() {
        debug!(cell = %plan.cell, run = %prior, "Earlier run left no archive");
        return Ok(false);
    }
    let old = CoverageManifest::load(&store.manifest_path(prior, &plan.cell))?;
    Ok(old.canonical_bytes() == plan.manifest.canonical_bytes())
}
