//! The `downsample` step: fill the zooms below the aggregation zoom.

use std::sync::Arc;

use tracing::info;

use super::batch::{run_bounded, BatchSummary};
use crate::archive::{ArchiveRegistry, LocalArchiveSource};
use crate::downsample::{plan_level, Downsampler};
use crate::error::PipelineError;
use crate::store::{RunId, StageOutcome, StoreLayout};
use crate::tile::TileFormat;

/// Settings of the `downsample` step.
#[derive(Debug, Clone)]
pub struct DownsampleOptions {
    pub workers: usize,
    pub aggregation_zoom: u8,
    pub extent_depth: u8,
    pub tile_format: TileFormat,
    pub attribution: String,
}

/// Build every dirty downsample extent of `run`, finest level first.
///
/// A level only starts once the previous one has finished, since it reads
/// that level's archives.
pub async fn downsample(
    store: &StoreLayout,
    run: &RunId,
    options: &DownsampleOptions,
) -> Result<BatchSummary, PipelineError> {
    let registry = Arc::new(ArchiveRegistry::new(LocalArchiveSource::new(store.root())));
    let sampler = Arc::new(Downsampler::new(
        registry,
        options.tile_format,
        options.attribution.clone(),
    ));

    let mut summary = BatchSummary::default();
    for parent_zoom in (0..options.aggregation_zoom).rev() {
        let plans = plan_level(
            store,
            run,
            parent_zoom,
            options.aggregation_zoom,
            options.extent_depth,
        )?;
        if plans.is_empty() {
            continue;
        }
        info!(zoom = parent_zoom, extents = plans.len(), "Downsampling level");

        let units = plans
            .into_iter()
            .map(|p| (format!("{}@{}", p.extent, parent_zoom), p))
            .collect();
        let (store, run, sampler) = (store.clone(), run.clone(), Arc::clone(&sampler));
        let level = run_bounded(units, options.workers, move |manifest| {
            let (store, run, sampler) = (store.clone(), run.clone(), Arc::clone(&sampler));
            async move {
                let output = store.downsample_archive_path(&run, &manifest.extent, parent_zoom);
                if output.is_file() {
                    return Ok(StageOutcome::Skipped);
                }
                manifest.save(&store.downsample_manifest_path(&run, &manifest.extent, parent_zoom))?;
                Ok(sampler.run(&manifest, &output).await?)
            }
        })
        .await;
        summary.merge(level);
    }

    summary.log("downsample");
    Ok(summary)
}
