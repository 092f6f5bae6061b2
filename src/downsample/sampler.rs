//! Building parent tiles from archived children.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::plan::DownsampleManifest;
use crate::archive::{tile_id, ArchiveProperties, ArchiveRegistry, ArchiveSource, ArchiveWriter};
use crate::error::{DownsampleError, TileError};
use crate::raster::{GeoTransform, RasterBlock};
use crate::store::StageOutcome;
use crate::tile::{decode_grid, encode_grid, Bounds, TileCoord, TileEncoder, TileFormat, NODATA, TILE_SIZE};

/// Decoded elevations of one child tile, or `None` if absent.
pub type ChildGrid = Option<Vec<f32>>;

/// Average four children (NW, NE, SW, SE) into one parent grid.
///
/// Absent children contribute nodata; a parent pixel whose four source
/// pixels are all nodata is nodata.
pub fn average_children(children: &[ChildGrid; 4]) -> Vec<f32> {
    let side = 2 * TILE_SIZE;
    let mut full = RasterBlock::filled(
        side,
        side,
        NODATA,
        GeoTransform {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_size: 1.0,
        },
    );

    let data = full.data_mut();
    for (i, child) in children.iter().enumerate() {
        let Some(values) = child else {
            continue;
        };
        let (col0, row0) = ((i % 2) * TILE_SIZE, (i / 2) * TILE_SIZE);
        for (row, line) in values.chunks_exact(TILE_SIZE).take(TILE_SIZE).enumerate() {
            let start = (row0 + row) * side + col0;
            data[start..start + TILE_SIZE].copy_from_slice(line);
        }
    }

    full.mean_2x2().into_data()
}

/// Builds the archives of downsample extents.
pub struct Downsampler<S: ArchiveSource> {
    registry: Arc<ArchiveRegistry<S>>,
    encoder: TileEncoder,
    attribution: String,
}

impl<S: ArchiveSource + 'static> Downsampler<S> {
    pub fn new(
        registry: Arc<ArchiveRegistry<S>>,
        format: TileFormat,
        attribution: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            encoder: TileEncoder::new(format),
            attribution: attribution.into(),
        }
    }

    /// Build the archive of one extent at `output`.
    ///
    /// Skips when the archive already exists. Parents without any child are
    /// not emitted; if no parent has children, nothing is written.
    pub async fn run(
        &self,
        manifest: &DownsampleManifest,
        output: &Path,
    ) -> Result<StageOutcome, DownsampleError> {
        if output.is_file() {
            debug!(extent = %manifest.extent, zoom = manifest.parent_zoom, "Extent already downsampled");
            return Ok(StageOutcome::Skipped);
        }
        let start = Instant::now();

        let mut groups = Vec::new();
        for parent in manifest.parents() {
            let children = self.fetch_children(manifest, &parent).await?;
            if children.iter().any(Option::is_some) {
                groups.push((parent, children));
            }
        }
        if groups.is_empty() {
            warn!(extent = %manifest.extent, zoom = manifest.parent_zoom, "Extent has no child tiles");
            return Ok(StageOutcome::Completed);
        }
        let fetched_ms = start.elapsed().as_millis() as u64;

        let encoder = self.encoder.clone();
        let mut tiles = tokio::task::spawn_blocking(move || {
            groups
                .into_par_iter()
                .map(|(parent, children)| build_parent(&encoder, parent, &children))
                .collect::<Result<Vec<_>, TileError>>()
        })
        .await
        .map_err(|e| DownsampleError::Join(e.to_string()))??;
        tiles.sort_by_key(|(id, _, _)| *id);

        let mut bounds: Option<Bounds> = None;
        let mut writer = ArchiveWriter::create(output)?;
        for (id, coord, data) in &tiles {
            writer.append(*id, data)?;
            let b = coord.lnglat_bounds();
            bounds = Some(bounds.map_or(b, |acc| acc.union(&b)));
        }
        let summary = writer.finalize(&ArchiveProperties {
            tile_format: self.encoder.format(),
            min_zoom: manifest.parent_zoom,
            max_zoom: manifest.parent_zoom,
            bounds: bounds.unwrap_or_else(|| manifest.extent.lnglat_bounds()),
            attribution: self.attribution.clone(),
        })?;

        info!(
            extent = %manifest.extent,
            zoom = manifest.parent_zoom,
            tiles = summary.addressed_tiles,
            fetched_ms,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Downsampled extent"
        );
        Ok(StageOutcome::Completed)
    }

    async fn fetch_children(
        &self,
        manifest: &DownsampleManifest,
        parent: &TileCoord,
    ) -> Result<[Option<Bytes>; 4], DownsampleError> {
        let mut out: [Option<Bytes>; 4] = Default::default();
        let Some(children) = parent.children() else {
            return Ok(out);
        };
        for (slot, child) in out.iter_mut().zip(children.iter()) {
            let Some(archive) = manifest.archive_for(child) else {
                continue;
            };
            let reader = self.registry.get(&archive.archive_id()).await?;
            *slot = reader.get_tile(child).await?;
        }
        Ok(out)
    }
}

fn build_parent(
    encoder: &TileEncoder,
    parent: TileCoord,
    children: &[Option<Bytes>; 4],
) -> Result<(u64, TileCoord, Bytes), TileError> {
    let mut grids: [ChildGrid; 4] = Default::default();
    for (grid, child) in grids.iter_mut().zip(children.iter()) {
        if let Some(bytes) = child {
            let rgb = encoder.decode(bytes, TILE_SIZE as u32)?;
            *grid = Some(decode_grid(&rgb));
        }
    }
    let values = average_children(&grids);
    let data = encoder.encode(&encode_grid(&values), TILE_SIZE as u32)?;
    Ok((tile_id(&parent), parent, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_children_average_to_constant() {
        let child = Some(vec![1234.5f32; TILE_SIZE * TILE_SIZE]);
        let children = [child.clone(), child.clone(), child.clone(), child];
        let parent = average_children(&children);
        assert_eq!(parent.len(), TILE_SIZE * TILE_SIZE);
        assert!(parent.iter().all(|&v| v == 1234.5));
    }

    #[test]
    fn test_missing_children_are_nodata() {
        let child = Some(vec![10.0f32; TILE_SIZE * TILE_SIZE]);
        let parent = average_children(&[child, None, None, None]);
        let half = TILE_SIZE / 2;
        // NW quadrant holds data, the rest is nodata, never zero
        assert_eq!(parent[0], 10.0);
        assert_eq!(parent[(half - 1) * TILE_SIZE + half - 1], 10.0);
        assert_eq!(parent[half], NODATA);
        assert_eq!(parent[half * TILE_SIZE], NODATA);
        assert_eq!(parent.iter().filter(|&&v| v == 0.0).count(), 0);
    }

    #[test]
    fn test_child_positions() {
        let grid = |v: f32| Some(vec![v; TILE_SIZE * TILE_SIZE]);
        let parent = average_children(&[grid(1.0), grid(2.0), grid(3.0), grid(4.0)]);
        let half = TILE_SIZE / 2;
        assert_eq!(parent[0], 1.0);
        assert_eq!(parent[TILE_SIZE - 1], 2.0);
        assert_eq!(parent[(TILE_SIZE - 1) * TILE_SIZE], 3.0);
        assert_eq!(parent[TILE_SIZE * TILE_SIZE - 1], 4.0);
        assert_eq!(parent[half * TILE_SIZE + half], 4.0);
    }

    #[test]
    fn test_decoded_nodata_stays_nodata() {
        let encoder = TileEncoder::new(TileFormat::Png);
        let mut values = vec![50.0f32; TILE_SIZE * TILE_SIZE];
        values[0] = NODATA;
        values[1] = NODATA;
        values[TILE_SIZE] = NODATA;
        values[TILE_SIZE + 1] = NODATA;
        let bytes = encoder
            .encode(&encode_grid(&values), TILE_SIZE as u32)
            .unwrap();

        let parent = TileCoord::new(8, 0, 0).unwrap();
        let (_, _, data) =
            build_parent(&encoder, parent, &[Some(bytes), None, None, None]).unwrap();
        let out = decode_grid(&encoder.decode(&data, TILE_SIZE as u32).unwrap());
        assert_eq!(out[0], NODATA);
        assert_eq!(out[1], 50.0);
    }
}
