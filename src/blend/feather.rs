//! Seam feathering between two elevation layers.
//!
//! The canvas keeps its values in its interior and fades into the next layer
//! over a band just inside its nodata boundary:
//!
//! ```text
//! valid   = canvas != nodata
//! reduced = erode(valid, k1)          4-connected, outside counts as invalid
//! alpha   = smoothstep(box(reduced, k2))
//! alpha   = 0 where canvas is nodata, 1 where the layer is nodata
//! canvas  = layer * (1 - alpha) + canvas * alpha
//! ```

use crate::error::RasterError;
use crate::raster::RasterBlock;
use crate::tile::NODATA;

/// Erosion depth and box filter size for a buffer of `buffer_pixels`.
///
/// `k1 = floor(buffer / 2)`, `k2 = max(1, floor(1.25 * k1))`.
pub fn kernel_sizes(buffer_pixels: usize) -> (usize, usize) {
    let k1 = buffer_pixels / 2;
    let k2 = ((k1 * 5) / 4).max(1);
    (k1, k2)
}

/// `3a² − 2a³` on `[0, 1]`; flat at both ends.
#[inline]
pub fn smoothstep(a: f32) -> f32 {
    let a = a.clamp(0.0, 1.0);
    a * a * (3.0 - 2.0 * a)
}

/// Binary erosion by a 4-connected cross, repeated `iterations` times.
///
/// Equivalent to keeping the pixels whose city-block distance to the nearest
/// invalid pixel exceeds `iterations`, with everything outside the grid
/// invalid. Computed with a two-pass distance transform.
pub fn erode(mask: &[bool], width: usize, height: usize, iterations: usize) -> Vec<bool> {
    if iterations == 0 {
        return mask.to_vec();
    }

    let mut dist: Vec<u32> = mask
        .iter()
        .map(|&valid| if valid { u32::MAX } else { 0 })
        .collect();

    for row in 0..height {
        for col in 0..width {
            let i = row * width + col;
            if dist[i] == 0 {
                continue;
            }
            let up = if row == 0 { 0 } else { dist[i - width] };
            let left = if col == 0 { 0 } else { dist[i - 1] };
            dist[i] = dist[i].min(up.saturating_add(1)).min(left.saturating_add(1));
        }
    }
    for row in (0..height).rev() {
        for col in (0..width).rev() {
            let i = row * width + col;
            if dist[i] == 0 {
                continue;
            }
            let down = if row + 1 == height { 0 } else { dist[i + width] };
            let right = if col + 1 == width { 0 } else { dist[i + 1] };
            dist[i] = dist[i].min(down.saturating_add(1)).min(right.saturating_add(1));
        }
    }

    let k = u32::try_from(iterations).unwrap_or(u32::MAX);
    dist.into_iter().map(|d| d > k).collect()
}

/// Separable mean filter of side `size`, edges extended with the nearest
/// value.
///
/// The window of pixel `i` spans `i - size/2 ..= i - size/2 + size - 1`.
pub fn box_filter(values: &[f32], width: usize, height: usize, size: usize) -> Vec<f32> {
    if size <= 1 || values.is_empty() {
        return values.to_vec();
    }

    let mut horizontal = vec![0.0f32; values.len()];
    let mut line = Vec::with_capacity(width.max(height));
    let mut out = Vec::with_capacity(width.max(height));

    for row in 0..height {
        line.clear();
        line.extend_from_slice(&values[row * width..(row + 1) * width]);
        filter_line(&line, size, &mut out);
        horizontal[row * width..(row + 1) * width].copy_from_slice(&out);
    }

    let mut result = vec![0.0f32; values.len()];
    for col in 0..width {
        line.clear();
        line.extend((0..height).map(|row| horizontal[row * width + col]));
        filter_line(&line, size, &mut out);
        for (row, v) in out.iter().enumerate() {
            result[row * width + col] = *v;
        }
    }
    result
}

/// One-dimensional nearest-edge mean filter using prefix sums.
fn filter_line(line: &[f32], size: usize, out: &mut Vec<f32>) {
    out.clear();
    let n = line.len();
    if n == 0 {
        return;
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    for &v in line {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + f64::from(v));
    }

    let half = (size / 2) as isize;
    let first = f64::from(line[0]);
    let last = f64::from(line[n - 1]);
    for i in 0..n as isize {
        let lo = i - half;
        let hi = lo + size as isize - 1;
        let before = (-lo).max(0) as f64;
        let after = (hi - (n as isize - 1)).max(0) as f64;
        let a = lo.max(0) as usize;
        let b = (hi.min(n as isize - 1) + 1) as usize;
        let sum = before * first + after * last + (prefix[b] - prefix[a]);
        out.push((sum / size as f64) as f32);
    }
}

/// Blend `layer` under `canvas` in place.
pub fn blend_layer(
    canvas: &mut RasterBlock,
    layer: &RasterBlock,
    buffer_pixels: usize,
) -> Result<(), RasterError> {
    canvas.ensure_same_shape(layer)?;
    let (width, height) = (canvas.width(), canvas.height());
    let (k1, k2) = kernel_sizes(buffer_pixels);

    let valid: Vec<bool> = canvas.data().iter().map(|&v| v != NODATA).collect();
    let reduced: Vec<f32> = erode(&valid, width, height, k1)
        .into_iter()
        .map(|keep| if keep { 1.0 } else { 0.0 })
        .collect();
    let alpha = box_filter(&reduced, width, height, k2);

    for (i, out) in canvas.data_mut().iter_mut().enumerate() {
        let under = layer.data()[i];
        let a = if !valid[i] {
            0.0
        } else if under == NODATA {
            1.0
        } else {
            smoothstep(alpha[i])
        };
        *out = under * (1.0 - a) + *out * a;
    }
    Ok(())
}

/// Fold layers, most important first, into one raster.
///
/// Each later layer only fills where the canvas is still nodata, feathered
/// at the canvas boundary. Stops as soon as the canvas has no nodata left.
pub fn fold<I>(layers: I, buffer_pixels: usize) -> Result<Option<RasterBlock>, RasterError>
where
    I: IntoIterator<Item = RasterBlock>,
{
    let mut layers = layers.into_iter();
    let Some(mut canvas) = layers.next() else {
        return Ok(None);
    };
    for layer in layers {
        if !canvas.contains_nodata() {
            break;
        }
        blend_layer(&mut canvas, &layer, buffer_pixels)?;
    }
    Ok(Some(canvas))
}
