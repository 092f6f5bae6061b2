//! In-memory elevation grids and their on-disk forms.
//!
//! Two layouts are read:
//! - framed rasters written by this crate: a 36-byte header followed by
//!   row-major `f32` little-endian samples
//! - raw Float32 rasters written by the toolkit: samples only, with the
//!   dimensions and geotransform known from the request that produced them

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoError, RasterError};
use crate::io::{f32_samples, le_at, BlockCache, LocalFileReader, RangeReader};
use crate::tile::{Bounds, NODATA};

/// Magic bytes of a framed raster.
const MAGIC: &[u8; 4] = b"EMR1";

/// Size of the framed raster header.
///
/// ```text
/// magic(4) width(u32) height(u32) origin_x(f64) origin_y(f64) pixel_size(f64)
/// ```
pub const FRAMED_HEADER_SIZE: usize = 36;

// =============================================================================
// Geometry
// =============================================================================

/// Position of a raster on the EPSG:3857 plane.
///
/// The origin is the top-left corner; rows grow southwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
}

impl GeoTransform {
    /// Transform whose origin is the top-left corner of `bounds`.
    pub fn for_bounds(bounds: &Bounds, pixel_size: f64) -> Self {
        Self {
            origin_x: bounds.min_x,
            origin_y: bounds.max_y,
            pixel_size,
        }
    }

    /// Transform of a sub-window starting at `(col, row)`.
    pub fn offset(&self, col: usize, row: usize) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.pixel_size,
            origin_y: self.origin_y - row as f64 * self.pixel_size,
            pixel_size: self.pixel_size,
        }
    }

    /// Pixel containing the point `(x, y)`, if it lies inside a
    /// `width × height` raster.
    pub fn pixel_at(&self, x: f64, y: f64, width: usize, height: usize) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.pixel_size).floor();
        let row = ((self.origin_y - y) / self.pixel_size).floor();
        if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
            return None;
        }
        Some((col as usize, row as usize))
    }
}

/// Target grid of a reprojection: an extent and a square pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub bounds: Bounds,
    pub resolution: f64,
}

impl GridSpec {
    pub fn new(bounds: Bounds, resolution: f64) -> Self {
        Self { bounds, resolution }
    }

    pub fn width(&self) -> usize {
        (self.bounds.width() / self.resolution).round() as usize
    }

    pub fn height(&self) -> usize {
        (self.bounds.height() / self.resolution).round() as usize
    }

    pub fn transform(&self) -> GeoTransform {
        GeoTransform::for_bounds(&self.bounds, self.resolution)
    }
}

/// Rectangular pixel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    /// The whole of a `width × height` raster.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    fn check(&self, raster_width: usize, raster_height: usize) -> Result<(), RasterError> {
        if self.col + self.width > raster_width || self.row + self.height > raster_height {
            return Err(RasterError::WindowOutOfBounds {
                col: self.col,
                row: self.row,
                width: self.width,
                height: self.height,
                raster_width,
                raster_height,
            });
        }
        Ok(())
    }
}

// =============================================================================
// RasterBlock
// =============================================================================

/// Row-major grid of elevations with [`NODATA`] marking uncovered pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBlock {
    width: usize,
    height: usize,
    data: Vec<f32>,
    transform: GeoTransform,
}

impl RasterBlock {
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        transform: GeoTransform,
    ) -> Result<Self, RasterError> {
        if data.len() != width * height {
            return Err(RasterError::DataLength {
                width,
                height,
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            transform,
        })
    }

    /// A block with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f32, transform: GeoTransform) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
            transform,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// EPSG:3857 extent covered by the block.
    pub fn bounds(&self) -> Bounds {
        let t = self.transform;
        Bounds::new(
            t.origin_x,
            t.origin_y - self.height as f64 * t.pixel_size,
            t.origin_x + self.width as f64 * t.pixel_size,
            t.origin_y,
        )
    }

    pub fn contains_nodata(&self) -> bool {
        self.data.iter().any(|&v| v == NODATA)
    }

    pub fn nodata_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == NODATA).count()
    }

    /// True when every pixel is nodata.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == NODATA)
    }

    /// Error unless `other` has the same dimensions.
    pub fn ensure_same_shape(&self, other: &RasterBlock) -> Result<(), RasterError> {
        if self.width != other.width || self.height != other.height {
            return Err(RasterError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: other.width,
                height: other.height,
            });
        }
        Ok(())
    }

    /// Copy out a sub-window.
    pub fn window(&self, window: Window) -> Result<RasterBlock, RasterError> {
        window.check(self.width, self.height)?;
        let mut data = Vec::with_capacity(window.width * window.height);
        for row in window.row..window.row + window.height {
            let start = row * self.width + window.col;
            data.extend_from_slice(&self.data[start..start + window.width]);
        }
        Ok(RasterBlock {
            width: window.width,
            height: window.height,
            data,
            transform: self.transform.offset(window.col, window.row),
        })
    }

    /// Halve the resolution by averaging each 2×2 block.
    ///
    /// Nodata pixels are left out of the mean; a block with no valid pixel
    /// stays nodata. An odd trailing row or column is dropped.
    pub fn mean_2x2(&self) -> RasterBlock {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            let top = 2 * row * self.width;
            let bottom = top + self.width;
            for col in 0..width {
                let c = 2 * col;
                let quad = [
                    self.data[top + c],
                    self.data[top + c + 1],
                    self.data[bottom + c],
                    self.data[bottom + c + 1],
                ];
                data.push(nodata_mean(&quad));
            }
        }
        RasterBlock {
            width,
            height,
            data,
            transform: GeoTransform {
                pixel_size: self.transform.pixel_size * 2.0,
                ..self.transform
            },
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write the block as a framed raster, atomically.
    pub fn save(&self, path: &Path) -> Result<(), RasterError> {
        let mut header = Vec::with_capacity(FRAMED_HEADER_SIZE);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(self.width as u32).to_le_bytes());
        header.extend_from_slice(&(self.height as u32).to_le_bytes());
        header.extend_from_slice(&self.transform.origin_x.to_le_bytes());
        header.extend_from_slice(&self.transform.origin_y.to_le_bytes());
        header.extend_from_slice(&self.transform.pixel_size.to_le_bytes());
        write_samples(path, &header, &self.data)
    }

    /// Write only the samples, the layout the toolkit produces.
    pub fn save_raw(&self, path: &Path) -> Result<(), RasterError> {
        write_samples(path, &[], &self.data)
    }

    /// Read a framed raster in full.
    pub async fn load(path: &Path) -> Result<RasterBlock, RasterError> {
        let file = RasterFile::open_framed(path).await?;
        file.read_window(Window::full(file.width, file.height)).await
    }
}

/// Mean of the valid values, or nodata if there are none.
pub fn nodata_mean(values: &[f32]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for &v in values {
        if v != NODATA {
            sum += f64::from(v);
            count += 1;
        }
    }
    if count == 0 {
        NODATA
    } else {
        (sum / f64::from(count)) as f32
    }
}

fn write_samples(path: &Path, header: &[u8], data: &[f32]) -> Result<(), RasterError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |e: std::io::Error| RasterError::Io(IoError::from_std(path, e));

    fs::create_dir_all(dir).map_err(io_err)?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        out.write_all(header).map_err(io_err)?;
        for v in data {
            out.write_all(&v.to_le_bytes()).map_err(io_err)?;
        }
        out.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

// =============================================================================
// RasterFile
// =============================================================================

/// A raster on disk, read window by window through a range reader.
pub struct RasterFile<R> {
    reader: R,
    path: PathBuf,
    width: usize,
    height: usize,
    transform: GeoTransform,
    data_offset: u64,
}

impl RasterFile<BlockCache<LocalFileReader>> {
    /// Open a framed raster; dimensions come from its header.
    pub async fn open_framed(path: &Path) -> Result<Self, RasterError> {
        let reader = BlockCache::new(LocalFileReader::open(path).await?);
        Self::framed(reader, path).await
    }

    /// Open a raw Float32 raster of known shape.
    pub async fn open_raw(
        path: &Path,
        width: usize,
        height: usize,
        transform: GeoTransform,
    ) -> Result<Self, RasterError> {
        let reader = BlockCache::new(LocalFileReader::open(path).await?);
        Self::raw(reader, path, width, height, transform)
    }
}

impl<R: RangeReader> RasterFile<R> {
    pub async fn framed(reader: R, path: &Path) -> Result<Self, RasterError> {
        let invalid = |message: String| RasterError::InvalidFile {
            path: path.display().to_string(),
            message,
        };
        if reader.size() < FRAMED_HEADER_SIZE as u64 {
            return Err(invalid(format!("{} bytes is shorter than the header", reader.size())));
        }
        let header = reader.read_exact_at(0, FRAMED_HEADER_SIZE).await?;
        if &header[0..4] != MAGIC {
            return Err(invalid("bad magic".to_string()));
        }
        let width = le_at::<u32>(&header, 4) as usize;
        let height = le_at::<u32>(&header, 8) as usize;
        let f64_at = |at: usize| le_at::<f64>(&header, at);
        let transform = GeoTransform {
            origin_x: f64_at(12),
            origin_y: f64_at(20),
            pixel_size: f64_at(28),
        };

        let expected = FRAMED_HEADER_SIZE as u64 + (width * height * 4) as u64;
        if reader.size() != expected {
            return Err(invalid(format!(
                "{width}x{height} raster needs {expected} bytes, file has {}",
                reader.size()
            )));
        }

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            width,
            height,
            transform,
            data_offset: FRAMED_HEADER_SIZE as u64,
        })
    }

    pub fn raw(
        reader: R,
        path: &Path,
        width: usize,
        height: usize,
        transform: GeoTransform,
    ) -> Result<Self, RasterError> {
        let expected = (width * height * 4) as u64;
        if reader.size() != expected {
            return Err(RasterError::InvalidFile {
                path: path.display().to_string(),
                message: format!(
                    "{width}x{height} raster needs {expected} bytes, file has {}",
                    reader.size()
                ),
            });
        }
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            width,
            height,
            transform,
            data_offset: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a window. Each row is one contiguous range.
    pub async fn read_window(&self, window: Window) -> Result<RasterBlock, RasterError> {
        window.check(self.width, self.height)?;
        let row_bytes = window.width * 4;
        let mut data = Vec::with_capacity(window.width * window.height);

        if window.col == 0 && window.width == self.width {
            let offset = self.data_offset + (window.row * row_bytes) as u64;
            let bytes = self
                .reader
                .read_exact_at(offset, row_bytes * window.height)
                .await?;
            data.extend(f32_samples(&bytes));
        } else {
            for row in window.row..window.row + window.height {
                let offset = self.data_offset + ((row * self.width + window.col) * 4) as u64;
                let bytes = self.reader.read_exact_at(offset, row_bytes).await?;
                data.extend(f32_samples(&bytes));
            }
        }

        RasterBlock::new(
            window.width,
            window.height,
            data,
            self.transform.offset(window.col, window.row),
        )
    }
}
