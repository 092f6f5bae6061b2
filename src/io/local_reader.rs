use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::RangeReader;
use crate::error::IoError;

/// Range reader over a file on the local filesystem.
///
/// The file handle is shared behind a mutex; seek + read pairs are issued
/// under the lock so concurrent callers never interleave.
pub struct LocalFileReader {
    path: PathBuf,
    identifier: String,
    size: u64,
    file: Mutex<File>,
}

impl LocalFileReader {
    /// Open a file for range reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| IoError::from_std(&path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::from_std(&path, e))?
            .len();

        Ok(Self {
            identifier: format!("file://{}", path.display()),
            path,
            size,
            file: Mutex::new(file),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::from_std(&self.path, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::from_std(&self.path, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
