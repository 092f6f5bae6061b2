//! The external raster toolkit.
//!
//! Mosaicking, reprojection and format conversion are delegated to GDAL's
//! command-line tools. Every output is a raw Float32 raster whose shape is
//! fixed by the request, so reading it back needs no GDAL bindings.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::block::{GeoTransform, GridSpec, RasterBlock, RasterFile, Window};
use crate::error::{IoError, ToolkitError};

/// Target CRS of every reprojection.
pub const TARGET_CRS: &str = "EPSG:3857";

/// Longest stderr excerpt kept in an error.
const MAX_STDERR_LEN: usize = 2048;

/// A mosaic of input files that has not been resampled yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualRaster {
    pub path: PathBuf,
    pub inputs: Vec<PathBuf>,
}

/// A materialized raw Float32 raster on the EPSG:3857 grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterHandle {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
}

impl RasterHandle {
    /// Handle for a raster written on `grid`.
    pub fn on_grid(path: impl Into<PathBuf>, grid: &GridSpec) -> Self {
        Self {
            path: path.into(),
            width: grid.width(),
            height: grid.height(),
            transform: grid.transform(),
        }
    }

    pub fn full_window(&self) -> Window {
        Window::full(self.width, self.height)
    }
}

/// Raster operations the blend stages depend on.
#[async_trait]
pub trait RasterToolkit: Send + Sync {
    /// Combine `inputs` into one virtual raster at `output`.
    async fn mosaic(&self, inputs: &[PathBuf], output: &Path)
        -> Result<VirtualRaster, ToolkitError>;

    /// Resample a virtual raster in `source_crs` onto `grid`.
    async fn reproject(
        &self,
        input: &VirtualRaster,
        source_crs: &str,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError>;

    /// Convert a raster already on `grid` without resampling.
    async fn translate(
        &self,
        input: &Path,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError>;

    /// Read a window of a materialized raster.
    async fn read_window(
        &self,
        raster: &RasterHandle,
        window: Window,
    ) -> Result<RasterBlock, ToolkitError>;

    /// Whether any pixel of `grid` is the nodata sentinel.
    fn contains_sentinel(&self, grid: &RasterBlock) -> bool {
        grid.contains_nodata()
    }
}

/// Read a window of a raw Float32 raster described by `raster`.
pub async fn read_raw_window(
    raster: &RasterHandle,
    window: Window,
) -> Result<RasterBlock, ToolkitError> {
    let file =
        RasterFile::open_raw(&raster.path, raster.width, raster.height, raster.transform).await?;
    Ok(file.read_window(window).await?)
}

/// Check that a toolkit output holds exactly the samples of `handle`.
pub async fn verify_output(handle: &RasterHandle) -> Result<(), ToolkitError> {
    let len = tokio::fs::metadata(&handle.path)
        .await
        .map_err(|e| IoError::from_std(&handle.path, e))?
        .len();
    let expected = (handle.width * handle.height * 4) as u64;
    if len != expected {
        return Err(ToolkitError::UnexpectedOutput {
            path: handle.path.display().to_string(),
            message: format!(
                "expected {}x{} Float32 samples ({expected} bytes), found {len} bytes",
                handle.width, handle.height
            ),
        });
    }
    Ok(())
}

// =============================================================================
// GdalToolkit
// =============================================================================

/// [`RasterToolkit`] backed by `gdalbuildvrt`, `gdalwarp` and `gdal_translate`.
#[derive(Debug, Clone, Default)]
pub struct GdalToolkit {
    bin_dir: Option<PathBuf>,
}

impl GdalToolkit {
    /// Use the GDAL tools found on `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the GDAL tools in `bin_dir`.
    pub fn with_bin_dir(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: Some(bin_dir.into()),
        }
    }

    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    async fn run(&self, name: &str, args: Vec<OsString>) -> Result<(), ToolkitError> {
        let program = self.program(name);
        let start = Instant::now();
        let output = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolkitError::Spawn {
                program: program.display().to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let excerpt = match stderr.char_indices().nth(MAX_STDERR_LEN) {
                Some((cut, _)) => &stderr[..cut],
                None => stderr,
            };
            return Err(ToolkitError::ExitStatus {
                program: name.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: excerpt.to_string(),
            });
        }

        debug!(
            program = name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Toolkit command finished"
        );
        Ok(())
    }
}

fn arg(s: impl Into<OsString>) -> OsString {
    s.into()
}

#[async_trait]
impl RasterToolkit for GdalToolkit {
    async fn mosaic(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<VirtualRaster, ToolkitError> {
        let mut args = vec![arg("-overwrite"), arg(output)];
        args.extend(inputs.iter().map(arg));
        self.run("gdalbuildvrt", args).await?;
        Ok(VirtualRaster {
            path: output.to_path_buf(),
            inputs: inputs.to_vec(),
        })
    }

    async fn reproject(
        &self,
        input: &VirtualRaster,
        source_crs: &str,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError> {
        let b = grid.bounds;
        let res = grid.resolution.to_string();
        let args = vec![
            arg("-overwrite"),
            arg("-multi"),
            arg("-wo"),
            arg("NUM_THREADS=ALL_CPUS"),
            arg("-s_srs"),
            arg(source_crs),
            arg("-t_srs"),
            arg(TARGET_CRS),
            arg("-tr"),
            arg(res.clone()),
            arg(res),
            arg("-te"),
            arg(b.min_x.to_string()),
            arg(b.min_y.to_string()),
            arg(b.max_x.to_string()),
            arg(b.max_y.to_string()),
            arg("-r"),
            arg("cubicspline"),
            arg("-dstnodata"),
            arg("-9999"),
            arg("-ot"),
            arg("Float32"),
            arg("-of"),
            arg("ENVI"),
            arg(&input.path),
            arg(output),
        ];
        self.run("gdalwarp", args).await?;

        let handle = RasterHandle::on_grid(output, grid);
        verify_output(&handle).await?;
        Ok(handle)
    }

    async fn translate(
        &self,
        input: &Path,
        grid: &GridSpec,
        output: &Path,
    ) -> Result<RasterHandle, ToolkitError> {
        let args = vec![
            arg("-of"),
            arg("ENVI"),
            arg("-ot"),
            arg("Float32"),
            arg("-a_nodata"),
            arg("-9999"),
            arg("-outsize"),
            arg(grid.width().to_string()),
            arg(grid.height().to_string()),
            arg(input),
            arg(output),
        ];
        self.run("gdal_translate", args).await?;

        let handle = RasterHandle::on_grid(output, grid);
        verify_output(&handle).await?;
        Ok(handle)
    }

    async fn read_window(
        &self,
        raster: &RasterHandle,
        window: Window,
    ) -> Result<RasterBlock, ToolkitError> {
        read_raw_window(raster, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Bounds;

    fn grid() -> GridSpec {
        GridSpec::new(Bounds::new(0.0, 0.0, 40.0, 20.0), 10.0)
    }

    #[test]
    fn test_program_path() {
        assert_eq!(GdalToolkit::new().program("gdalwarp"), PathBuf::from("gdalwarp"));
        assert_eq!(
            GdalToolkit::with_bin_dir("/opt/gdal/bin").program("gdalwarp"),
            PathBuf::from("/opt/gdal/bin/gdalwarp")
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let toolkit = GdalToolkit::with_bin_dir("/nonexistent/bin");
        let dir = tempfile::tempdir().unwrap();
        let result = toolkit.mosaic(&[], &dir.path().join("m.vrt")).await;
        assert!(matches!(result, Err(ToolkitError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_verify_output_and_read_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.bin");
        let handle = RasterHandle::on_grid(&path, &grid());
        assert_eq!((handle.width, handle.height), (4, 2));

        let block = RasterBlock::new(
            4,
            2,
            (0..8).map(|v| v as f32).collect(),
            handle.transform,
        )
        .unwrap();
        block.save_raw(&path).unwrap();
        verify_output(&handle).await.unwrap();

        let row = read_raw_window(&handle, Window::new(0, 1, 4, 1)).await.unwrap();
        assert_eq!(row.data(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(row.transform().origin_y, 10.0);

        let wrong = RasterHandle {
            width: 3,
            ..handle.clone()
        };
        assert!(matches!(
            verify_output(&wrong).await,
            Err(ToolkitError::UnexpectedOutput { .. })
        ));
    }
}
