//! Web Mercator quadtree addressing.
//!
//! Tiles follow the XYZ convention: `x` grows eastwards, `y` grows southwards,
//! and zoom `z` splits the world into `2^z × 2^z` squares.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordError;

/// WGS84 semi-major axis used by EPSG:3857.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the circumference of the Web Mercator square, in metres.
pub const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;

/// Edge length of every emitted tile, in pixels.
pub const TILE_SIZE: usize = 512;

/// Deepest zoom that archive tile ids can address.
pub const MAX_ZOOM: u8 = 30;

/// Ground size of one pixel at `zoom`, in metres, for 512 px tiles.
pub fn resolution(zoom: u8) -> f64 {
    2.0 * ORIGIN_SHIFT / f64::from(1u32 << zoom.min(MAX_ZOOM)) / TILE_SIZE as f64
}

// =============================================================================
// Bounds
// =============================================================================

/// Axis-aligned rectangle. Units depend on the producer (metres or degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn buffered(&self, margin: f64) -> Self {
        Self::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    /// True when the two rectangles share a region of positive area.
    ///
    /// Rectangles that only touch along an edge or at a corner do not
    /// intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        w > 0.0 && h > 0.0
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Bounds) -> Self {
        Self::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

// =============================================================================
// TileCoord
// =============================================================================

/// Quadtree address of a tile.
///
/// Invariant: `z <= 30` and `x, y < 2^z`. The fields are public for reading
/// and pattern matching; construct through [`TileCoord::new`] when the values
/// come from outside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Build a validated coordinate.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        if z > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(z));
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(CoordError::OutOfRange { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// The single tile at zoom 0.
    pub const fn root() -> Self {
        Self { z: 0, x: 0, y: 0 }
    }

    /// Number of tiles along one axis at this zoom.
    pub fn grid_size(&self) -> u64 {
        1u64 << self.z
    }

    /// `z-x-y`, the naming used for every per-tile file in the store.
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.z, self.x, self.y)
    }

    /// Parent tile, or `None` at zoom 0.
    pub fn parent(&self) -> Option<Self> {
        if self.z == 0 {
            return None;
        }
        Some(Self {
            z: self.z - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four children in row-major order (NW, NE, SW, SE), or `None` at
    /// the deepest zoom.
    pub fn children(&self) -> Option<[Self; 4]> {
        if self.z >= MAX_ZOOM {
            return None;
        }
        let z = self.z + 1;
        let (x, y) = (self.x * 2, self.y * 2);
        Some([
            Self { z, x, y },
            Self { z, x: x + 1, y },
            Self { z, x, y: y + 1 },
            Self {
                z,
                x: x + 1,
                y: y + 1,
            },
        ])
    }

    /// Ancestor at `zoom`, or `None` if `zoom` is deeper than this tile.
    ///
    /// `ancestor_at(self.z)` is the tile itself.
    pub fn ancestor_at(&self, zoom: u8) -> Option<Self> {
        if zoom > self.z {
            return None;
        }
        let shift = self.z - zoom;
        Some(Self {
            z: zoom,
            x: self.x >> shift,
            y: self.y >> shift,
        })
    }

    /// All descendants at `zoom`, row by row. Empty if `zoom` is shallower
    /// than this tile or beyond [`MAX_ZOOM`].
    pub fn descendants_at(&self, zoom: u8) -> impl Iterator<Item = TileCoord> {
        let (span, x0, y0) = if zoom < self.z || zoom > MAX_ZOOM {
            (0u32, 0u32, 0u32)
        } else {
            let shift = zoom - self.z;
            (1u32 << shift, self.x << shift, self.y << shift)
        };
        (0..span).flat_map(move |dy| {
            (0..span).map(move |dx| TileCoord {
                z: zoom,
                x: x0 + dx,
                y: y0 + dy,
            })
        })
    }

    /// True when `other` is this tile or one of its descendants.
    pub fn contains(&self, other: &TileCoord) -> bool {
        other.ancestor_at(self.z) == Some(*self)
    }

    /// Web Mercator (EPSG:3857) bounds in metres.
    pub fn xy_bounds(&self) -> Bounds {
        let size = 2.0 * ORIGIN_SHIFT / self.grid_size() as f64;
        let min_x = -ORIGIN_SHIFT + f64::from(self.x) * size;
        let max_y = ORIGIN_SHIFT - f64::from(self.y) * size;
        Bounds::new(min_x, max_y - size, min_x + size, max_y)
    }

    /// Geographic bounds in degrees (x = longitude, y = latitude).
    pub fn lnglat_bounds(&self) -> Bounds {
        let n = self.grid_size() as f64;
        let lon = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        Bounds::new(lon(x), lat(y + 1.0), lon(x + 1.0), lat(y))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.z, self.x, self.y)
    }
}

impl FromStr for TileCoord {
    type Err = CoordError;

    /// Parse a `z-x-y` name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoordError::InvalidName(s.to_string());
        let mut parts = s.split('-');
        let z = parts.next().ok_or_else(invalid)?;
        let x = parts.next().ok_or_else(invalid)?;
        let y = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        let z: u8 = z.parse().map_err(|_| invalid())?;
        let x: u32 = x.parse().map_err(|_| invalid())?;
        let y: u32 = y.parse().map_err(|_| invalid())?;
        TileCoord::new(z, x, y)
    }
}

/// Whether two tiles cover overlapping ground.
///
/// The deeper tile is projected to the shallower zoom; the tiles overlap iff
/// the projection equals the shallower tile.
pub fn overlaps(a: &TileCoord, b: &TileCoord) -> bool {
    let (shallow, deep) = if a.z <= b.z { (a, b) } else { (b, a) };
    deep.ancestor_at(shallow.z) == Some(*shallow)
}

/// Tiles at `zoom` whose squares touch `bounds` (EPSG:3857 metres).
///
/// Tiles that only share an edge with `bounds` are included; the range is
/// clamped to the zoom grid.
pub fn tiles_covering(bounds: &Bounds, zoom: u8) -> impl Iterator<Item = TileCoord> {
    let zoom = zoom.min(MAX_ZOOM);
    let n = 1u64 << zoom;
    let size = 2.0 * ORIGIN_SHIFT / n as f64;
    let last = (n - 1) as f64;
    let index = |v: f64| (v / size).floor().clamp(0.0, last) as u32;

    let x0 = index(bounds.min_x + ORIGIN_SHIFT);
    let x1 = index(bounds.max_x + ORIGIN_SHIFT);
    let y0 = index(ORIGIN_SHIFT - bounds.max_y);
    let y1 = index(ORIGIN_SHIFT - bounds.min_y);

    (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| TileCoord { z: zoom, x, y }))
}
