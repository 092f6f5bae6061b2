use std::path::PathBuf;

use thiserror::Error;

/// I/O errors that can occur when reading or writing store files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other filesystem failure
    #[error("Filesystem error on {path}: {message}")]
    Filesystem { path: String, message: String },
}

impl IoError {
    /// Wrap a `std::io::Error` together with the path it happened on.
    pub fn from_std(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into().display().to_string();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::Filesystem {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors produced by quadtree coordinate math
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Zoom level beyond what tile ids can address
    #[error("Invalid zoom level {0} (maximum is 30)")]
    InvalidZoom(u8),

    /// Column or row outside `0..2^z`
    #[error("Tile ({x}, {y}) is outside the {z} zoom grid")]
    OutOfRange { z: u8, x: u32, y: u32 },

    /// Tile name could not be parsed as `z-x-y`
    #[error("Invalid tile name: {0}")]
    InvalidName(String),
}

/// Errors raised while loading the source catalog
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// A collection.json could not be parsed
    #[error("Invalid collection file {path}: {message}")]
    InvalidCollection { path: String, message: String },

    #[error("Coordinate error: {0}")]
    Coord(#[from] CoordError),

    /// The catalog contains no usable source
    #[error("Catalog at {0} contains no complete collections")]
    Empty(String),
}

/// Failures of the external raster toolkit
#[derive(Debug, Clone, Error)]
pub enum ToolkitError {
    /// Process could not be started
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// Process exited with a non-zero status
    #[error("{program} exited with status {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// Toolkit reported success but its output is not what was asked for
    #[error("Unexpected toolkit output {path}: {message}")]
    UnexpectedOutput { path: String, message: String },
}

/// Errors in raster block handling
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Persisted raster has a bad header
    #[error("Invalid raster file {path}: {message}")]
    InvalidFile { path: String, message: String },

    /// Two rasters that must share a grid do not
    #[error("Raster shape mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    /// Sample count does not match the dimensions
    #[error("Raster of {width}x{height} needs {expected} samples, got {actual}")]
    DataLength {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    /// Requested window falls outside the raster
    #[error("Window {col}+{width}, {row}+{height} outside raster of {raster_width}x{raster_height}")]
    WindowOutOfBounds {
        col: usize,
        row: usize,
        width: usize,
        height: usize,
        raster_width: usize,
        raster_height: usize,
    },

    /// Crop margin eats the whole raster
    #[error("Cannot crop {margin} pixels from a {width}x{height} raster")]
    CropTooLarge {
        margin: usize,
        width: usize,
        height: usize,
    },
}

/// Errors in the per-cell blend stages
#[derive(Debug, Clone, Error)]
pub enum BlendError {
    /// Manifest references a leaf that is missing from the catalog or disk
    #[error("Leaf {leaf} of source {source_name} is missing or unreadable")]
    MissingLeaf { source_name: String, leaf: String },

    /// Manifest has no layers at all
    #[error("Manifest for cell {0} is empty")]
    EmptyManifest(String),

    /// Manifest names a source that the catalog does not know
    #[error("Unknown source {0}")]
    UnknownSource(String),

    #[error("Toolkit error: {0}")]
    Toolkit(#[from] ToolkitError),

    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Stage metadata could not be parsed
    #[error("Invalid stage metadata {path}: {message}")]
    InvalidMetadata { path: String, message: String },

    /// Blocking blend task panicked
    #[error("Blend task failed: {0}")]
    Join(String),
}

/// Errors raised by the pyramid encoder consistency checks
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    /// Raster side is not a power-of-two multiple of the tile size
    #[error("Raster of {width}x{height} is not a power-of-two multiple of {tile_size}")]
    InvalidBlockSize {
        width: usize,
        height: usize,
        tile_size: usize,
    },

    /// Overview count does not match the zoom span
    #[error("Expected {expected} overview levels, found {actual}")]
    OverviewMismatch { expected: usize, actual: usize },

    /// Emission floor lies above the pyramid's finest zoom
    #[error("Minimum zoom {min_zoom} exceeds pyramid maximum zoom {max_zoom}")]
    InvalidZoomRange { min_zoom: u8, max_zoom: u8 },

    #[error("Tile error: {0}")]
    Tile(#[from] TileError),
}

/// Errors that can occur when encoding or decoding tile images
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Failed to decode the tile image
    #[error("Failed to decode tile: {message}")]
    DecodeError { message: String },

    /// Failed to encode the tile image
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },

    /// Decoded image has the wrong dimensions
    #[error("Tile is {width}x{height}, expected {expected}x{expected}")]
    UnexpectedSize {
        width: u32,
        height: u32,
        expected: u32,
    },

    /// Grid passed to the encoder has the wrong length
    #[error("Grid has {actual} values, expected {expected}")]
    GridLength { expected: usize, actual: usize },
}

/// Errors that can occur when writing or reading PMTiles archives
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Magic bytes are not "PMTiles"
    #[error("Invalid archive magic bytes")]
    InvalidMagic,

    /// Archive spec version is not supported
    #[error("Unsupported archive version {0} (only 3 is supported)")]
    UnsupportedVersion(u8),

    /// File is too small to contain the header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Tiles were appended with a non-increasing id
    #[error("Tile id {tile_id} appended after {last_id}; ids must be strictly ascending")]
    OutOfOrder { tile_id: u64, last_id: u64 },

    /// Directory bytes are malformed
    #[error("Corrupt directory: {0}")]
    CorruptDirectory(String),

    /// Compression kind the reader cannot handle
    #[error("Unsupported internal compression {0}")]
    UnsupportedCompression(u8),

    /// Attempt to finalize an archive without tiles
    #[error("Archive has no tiles")]
    Empty,

    /// Serializing the archive layout failed
    #[error("Archive encoding failed: {0}")]
    Encode(String),

    #[error("Coordinate error: {0}")]
    Coord(#[from] CoordError),
}

/// Errors raised by the downsampling pass
#[derive(Debug, Clone, Error)]
pub enum DownsampleError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Tile error: {0}")]
    Tile(#[from] TileError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Coordinate error: {0}")]
    Coord(#[from] CoordError),

    /// Downsample manifest could not be parsed
    #[error("Invalid downsample manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Downsample task failed: {0}")]
    Join(String),
}

/// Top-level errors for a pipeline unit (cell or extent)
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Blend error: {0}")]
    Blend(#[from] BlendError),

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Downsample error: {0}")]
    Downsample(#[from] DownsampleError),

    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Coordinate error: {0}")]
    Coord(#[from] CoordError),

    /// Manifest file could not be parsed
    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    /// Background task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Join(String),
}
