//! One-time download of a stored file
//!
//! A [`Download`] owns its file exclusively: claiming renames the file to a
//! hidden name nobody else can resolve, and dropping the download deletes it
//! (RAII), whether or not the body was read to the end.

use super::StoreError;
use crate::format;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Size of the chunks the body is streamed in
pub const CHUNK_SIZE: usize = 65536; // 64KB

/// Bytes sniffed to determine the served content type
const SNIFF_LEN: usize = 512;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A claimed file, ready to be streamed out exactly once
pub struct Download {
    file: File,
    claimed: PathBuf,
    filename: String,
    content_type: &'static str,
    size: u64,
}

impl Download {
    /// Claim `path` by renaming it out of the resolvable namespace.
    pub(super) async fn claim(path: &Path) -> Result<Self, StoreError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(StoreError::NotFound)?
            .to_string();
        let claimed = path.with_file_name(format!(".{}.take", uuid::Uuid::new_v4()));

        match tokio::fs::rename(path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        }

        let file = match File::open(&claimed).await {
            Ok(file) => file,
            Err(e) => {
                // Claimed but unreadable: it still must not outlive this attempt.
                if let Err(cleanup) = tokio::fs::remove_file(&claimed).await {
                    tracing::warn!(path = %claimed.display(), error = %cleanup, "Failed to remove claimed file");
                }
                return Err(e.into());
            }
        };

        // The claim is fresh even when the upload is not, so the orphan
        // sweep leaves an in-flight download alone.
        let file = file.into_std().await;
        if let Err(e) = file.set_modified(SystemTime::now()) {
            tracing::debug!(path = %claimed.display(), error = %e, "Failed to refresh claim time");
        }

        let mut download = Self {
            file: File::from_std(file),
            claimed,
            filename,
            content_type: FALLBACK_CONTENT_TYPE,
            size: 0,
        };
        download.inspect().await?;
        Ok(download)
    }

    /// Record size and sniffed content type, then rewind for streaming.
    async fn inspect(&mut self) -> io::Result<()> {
        self.size = self.file.metadata().await?.len();

        let mut header = Vec::with_capacity(SNIFF_LEN);
        (&mut self.file)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut header)
            .await?;
        self.content_type = format::sniff(&header).unwrap_or(FALLBACK_CONTENT_TYPE);

        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    /// Name the file was stored under, `<id><ext>`
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Content type sniffed from the file's leading bytes
    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Size on disk when the file was claimed
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole file, then delete it
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    /// Stream the file in [`CHUNK_SIZE`] chunks.
    ///
    /// The file is deleted as soon as the stream ends, fails, or is dropped.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::unfold(Some(self), |state| async move {
            let mut download = state?;
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            match download.file.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(buf.freeze()), Some(download))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.claimed) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.claimed.display(),
                    error = %e,
                    "Failed to delete downloaded file"
                );
            }
        }
    }
}
