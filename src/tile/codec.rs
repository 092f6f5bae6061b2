//! Elevation ↔ RGB pixel codec (terrarium layout).
//!
//! An elevation `v` is shifted by 32768 and split across the three channels:
//! red holds the high byte, green the low byte and blue the fractional part in
//! 1/256 m steps. The nodata sentinel is stored as black, which decodes to
//! exactly −32768. Black is reserved for nodata: real elevations at or below
//! −32768 are clamped one step above it.

/// Nodata sentinel used in every intermediate raster.
pub const NODATA: f32 = -9999.0;

/// Offset added before splitting into channels.
const SHIFT: f64 = 32768.0;

/// Smallest shifted value of a real elevation, `[0, 0, 1]`.
const MIN_SHIFTED: f64 = 1.0 / 256.0;

/// Largest shifted value the three channels can hold.
const MAX_SHIFTED: f64 = 65535.0 + 255.0 / 256.0;

/// Elevation that black pixels decode to.
pub const DECODED_NODATA: f32 = -32768.0;

/// Encode one elevation into `[R, G, B]`.
///
/// Values outside the representable range are clamped. Only [`NODATA`] and
/// NaN encode to black, so `decode_grid` never mistakes a real value for a
/// gap.
#[inline]
pub fn encode_elevation(value: f32) -> [u8; 3] {
    if value == NODATA || value.is_nan() {
        return [0, 0, 0];
    }
    let shifted = (f64::from(value) + SHIFT).clamp(MIN_SHIFTED, MAX_SHIFTED);
    let whole = shifted.floor();
    let r = (whole / 256.0).floor();
    let g = whole - r * 256.0;
    let b = ((shifted - whole) * 256.0).floor();
    [r as u8, g as u8, b as u8]
}

/// Decode `[R, G, B]` into an elevation.
#[inline]
pub fn decode_elevation(rgb: [u8; 3]) -> f32 {
    let value = f64::from(rgb[0]) * 256.0 + f64::from(rgb[1]) + f64::from(rgb[2]) / 256.0 - SHIFT;
    value as f32
}

/// Encode a row-major grid into packed RGB bytes.
pub fn encode_grid(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 3);
    for &v in values {
        out.extend_from_slice(&encode_elevation(v));
    }
    out
}

/// Decode packed RGB bytes into elevations, mapping black pixels back to
/// [`NODATA`].
///
/// Used when re-reading archived tiles for averaging, where black marks an
/// area no source covered.
pub fn decode_grid(rgb: &[u8]) -> Vec<f32> {
    rgb.chunks_exact(3)
        .map(|px| match [px[0], px[1], px[2]] {
            [0, 0, 0] => NODATA,
            px => decode_elevation(px),
        })
        .collect()
}
