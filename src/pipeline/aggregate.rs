//! The `aggregate` step: blend, encode and publish every dirty cell of a run.

use std::sync::Arc;

use tracing::{debug, info};

use super::batch::{run_bounded, BatchSummary};
use crate::blend::CellBlender;
use crate::coverage::{assign_direct_copy, Catalog, CellKind, CellPlan, CoverageManifest};
use crate::error::PipelineError;
use crate::pyramid::PyramidEncoder;
use crate::raster::RasterToolkit;
use crate::store::{remove_dir_if_exists, RunId, StageOutcome, StoreLayout};
use crate::tile::{TileCoord, TileFormat};

/// Settings of the `aggregate` step.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub workers: usize,
    pub buffer_m: f64,
    /// Coarsest zoom written to cell archives.
    pub aggregation_zoom: u8,
    pub tile_format: TileFormat,
    pub attribution: String,
}

/// Processes the cells of a run against a toolkit.
pub struct Aggregator<T> {
    blender: Arc<CellBlender<T>>,
    encoder: Arc<PyramidEncoder>,
    catalog: Arc<Catalog>,
    store: StoreLayout,
    workers: usize,
}

impl<T> Clone for Aggregator<T> {
    fn clone(&self) -> Self {
        Self {
            blender: Arc::clone(&self.blender),
            encoder: Arc::clone(&self.encoder),
            catalog: Arc::clone(&self.catalog),
            store: self.store.clone(),
            workers: self.workers,
        }
    }
}

impl<T: RasterToolkit + 'static> Aggregator<T> {
    pub fn new(
        toolkit: Arc<T>,
        catalog: Arc<Catalog>,
        store: StoreLayout,
        options: &AggregateOptions,
    ) -> Self {
        let blender = CellBlender::new(
            toolkit,
            Arc::clone(&catalog),
            store.clone(),
            options.buffer_m,
        );
        let encoder = PyramidEncoder::new(
            options.tile_format,
            options.aggregation_zoom,
            options.attribution.clone(),
        );
        Self {
            blender: Arc::new(blender),
            encoder: Arc::new(encoder),
            catalog,
            store,
            workers: options.workers,
        }
    }

    /// Process every cell with a manifest in `run`.
    pub async fn run(&self, run: &RunId) -> Result<BatchSummary, PipelineError> {
        let cells = self.store.manifest_cells(run)?;
        info!(run = %run, cells = cells.len(), workers = self.workers, "Aggregating");

        let units = cells.into_iter().map(|c| (c.name(), c)).collect();
        let this = self.clone();
        let run = run.clone();
        let summary = run_bounded(units, self.workers, move |cell| {
            let this = this.clone();
            let run = run.clone();
            async move { this.process_cell(&run, &cell).await }
        })
        .await;

        summary.log("aggregate");
        Ok(summary)
    }

    /// Drive one cell from manifest to published archive.
    ///
    /// The archive's existence marks the cell as done; the work directory is
    /// removed once the archive is in place.
    pub async fn process_cell(
        &self,
        run: &RunId,
        cell: &TileCoord,
    ) -> Result<StageOutcome, PipelineError> {
        let archive_path = self.store.cell_archive_path(run, cell);
        let work_dir = self.store.work_dir(run, cell);
        if archive_path.is_file() {
            debug!(cell = %cell, "Cell archive exists");
            remove_dir_if_exists(&work_dir)?;
            return Ok(StageOutcome::Skipped);
        }

        let manifest = CoverageManifest::load(&self.store.manifest_path(run, cell))?;
        let plan = plan_from_manifest(&self.catalog, *cell, manifest);
        let raster = self.blender.blend(run, &plan).await?;

        let encoder = Arc::clone(&self.encoder);
        let cell_coord = *cell;
        tokio::task::spawn_blocking(move || encoder.write_archive(cell_coord, raster, &archive_path))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))??;

        remove_dir_if_exists(&work_dir)?;
        info!(cell = %cell, kind = ?plan.kind, "Cell done");
        Ok(StageOutcome::Completed)
    }
}

/// Rebuild the plan of a cell from its stored manifest.
///
/// Single-source and blended cells share a code path, so only direct copies
/// need telling apart.
pub fn plan_from_manifest(
    catalog: &Catalog,
    cell: TileCoord,
    manifest: CoverageManifest,
) -> CellPlan {
    let kind = if assign_direct_copy(catalog, &cell, &manifest) {
        CellKind::DirectCopy
    } else if manifest.source_count() > 1 {
        CellKind::Blend
    } else {
        CellKind::SingleSource
    };
    CellPlan {
        cell,
        manifest,
        kind,
    }
}
