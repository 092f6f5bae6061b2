//! Hilbert-curve tile ids.
//!
//! Every tile in an archive is addressed by a single integer: the number of
//! tiles at all shallower zooms plus the tile's position along the Hilbert
//! curve covering its own zoom. Consecutive ids are therefore spatially
//! close, which keeps directories small and reads local.
//!
//! Ids are assigned by `pmtiles2`, the same code that writes the archives;
//! the inverse is only needed to list what an archive holds.

use crate::error::CoordError;
use crate::tile::{TileCoord, MAX_ZOOM};

/// Number of tiles at all zooms strictly shallower than `z`: `Σ_{i<z} 4^i`.
#[inline]
fn zoom_offset(z: u8) -> u64 {
    ((1u64 << (2 * u32::from(z))) - 1) / 3
}

/// Rotate/flip a quadrant so the sub-curve keeps its orientation.
#[inline]
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

/// Tile id of a coordinate.
pub fn tile_id(coord: &TileCoord) -> u64 {
    pmtiles2::util::tile_id(coord.z, u64::from(coord.x), u64::from(coord.y))
}

/// Coordinate of a tile id; inverse of [`tile_id`].
pub fn tile_coord(id: u64) -> Result<TileCoord, CoordError> {
    let mut z = 0u8;
    while z <= MAX_ZOOM {
        if id < zoom_offset(z + 1) {
            break;
        }
        z += 1;
    }
    if z > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(z));
    }

    let n = 1u64 << z;
    let mut t = id - zoom_offset(z);
    let (mut x, mut y) = (0u64, 0u64);
    let mut s = 1u64;
    while s < n {
        let rx = 1 & (t / 2);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t /= 4;
        s *= 2;
    }
    TileCoord::new(z, x as u32, y as u32)
}
