//! Tile addressing and tile image handling.
//!
//! - [`coord`]: Web Mercator quadtree addressing ([`TileCoord`], [`Bounds`])
//! - [`codec`]: elevation ↔ RGB pixel codec
//! - [`TileEncoder`]: lossless WebP/PNG compression of RGB grids
//!
//! # Example
//!
//! ```
//! use elevation_mosaic::tile::{encode_grid, TileCoord, TileEncoder, TileFormat};
//!
//! let cell = TileCoord::new(9, 5, 3).unwrap();
//! assert_eq!(cell.name(), "9-5-3");
//!
//! let rgb = encode_grid(&vec![1200.0f32; 4 * 4]);
//! let webp = TileEncoder::new(TileFormat::Webp).encode(&rgb, 4).unwrap();
//! assert!(!webp.is_empty());
//! ```

pub mod codec;
pub mod coord;
mod encoder;

pub use codec::{
    decode_elevation, decode_grid, encode_elevation, encode_grid, DECODED_NODATA, NODATA,
};
pub use coord::{overlaps, resolution, tiles_covering, Bounds, TileCoord, MAX_ZOOM, TILE_SIZE};
pub use encoder::{TileEncoder, TileFormat};
