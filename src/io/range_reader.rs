use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Random-access reads over a stored file.
///
/// Archives and materialized rasters are both read through this trait so a
/// tile lookup or a raster window pulls only the bytes it touches.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A range past the end of the resource is an error, never a short read.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    fn size(&self) -> u64;

    /// Stable name for logs and cache keys.
    fn identifier(&self) -> &str;
}

// =============================================================================
// Little-endian fields
// =============================================================================

/// Fixed-width number stored little-endian in archive headers and raw
/// rasters.
pub trait LeField: Sized {
    const WIDTH: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! le_field {
    ($($ty:ty),*) => {$(
        impl LeField for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(buf)
            }
        }
    )*};
}

le_field!(u32, i32, u64, f32, f64);

/// Decode the field of type `T` at `offset`.
///
/// # Panics
/// Panics if `bytes` ends before `offset + T::WIDTH`.
#[inline]
pub fn le_at<T: LeField>(bytes: &[u8], offset: usize) -> T {
    T::from_le_slice(&bytes[offset..offset + T::WIDTH])
}

/// Iterate a run of packed little-endian `f32` samples. A trailing partial
/// sample is ignored.
pub fn f32_samples(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes.chunks_exact(f32::WIDTH).map(f32::from_le_slice)
}
