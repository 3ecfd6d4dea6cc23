//! Upload and retrieval pipeline
//!
//! Composes the validator, identifier generator, store and anonymizer into
//! the two operations the HTTP boundary needs. Every failure is collapsed
//! into a [`TransferResult`] or a not-found outcome here; nothing below this
//! layer decides what the caller sees.
//!
//! # Example
//!
//! ```no_run
//! use facemask::{config::Config, pipeline::Pipeline};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let pipeline = Pipeline::new(&config);
//!
//! let result = pipeline.upload(Bytes::from(std::fs::read("portrait.jpeg")?)).await;
//! if let Some(id) = result.id() {
//!     let download = pipeline.retrieve(id).await?;
//!     println!("{} ({} bytes)", download.filename(), download.size());
//! }
//! # Ok(())
//! # }
//! ```

use crate::anonymize::{AnonymizeError, FaceAnonymizer};
use crate::config::Config;
use crate::format::{FormatError, FormatValidator};
use crate::identifier::{self, ID_BYTES};
use crate::metrics;
use crate::store::{Download, ShardedStore, StoreError};
use crate::transfer::TransferResult;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Client-facing reason when an upload cannot be persisted. The detailed
/// error only goes to the log, since it names server paths.
pub const STORAGE_FAILURE_REASON: &str = "could not store file";

/// Client-facing reason when detection or blurring fails
pub const DETECTION_FAILURE_REASON: &str = "could not anonymize file";

/// The upload/retrieve pipeline. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    validator: FormatValidator,
    store: ShardedStore,
    anonymizer: Arc<FaceAnonymizer>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            FormatValidator::new(config.upload.max_size, config.upload.allowed_types.clone()),
            ShardedStore::new(&config.storage.root),
            FaceAnonymizer::from_config(&config.anonymizer),
        )
    }

    pub fn from_parts(
        validator: FormatValidator,
        store: ShardedStore,
        anonymizer: FaceAnonymizer,
    ) -> Self {
        Self {
            validator,
            store,
            anonymizer: Arc::new(anonymizer),
        }
    }

    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    /// Validate, store and anonymize an uploaded image.
    ///
    /// Only a [`TransferResult::Success`] leaves a file on disk.
    pub async fn upload(&self, body: Bytes) -> TransferResult {
        let result = self.upload_inner(body).await;
        metrics::record_upload(result.status());
        result
    }

    async fn upload_inner(&self, body: Bytes) -> TransferResult {
        let size = body.len();

        let kind = match self.validator.classify(&body) {
            Ok(kind) => kind,
            Err(e) => return reject(e),
        };

        let id = match identifier::generate(ID_BYTES) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to mint identifier");
                metrics::record_error("entropy");
                return TransferResult::storage(STORAGE_FAILURE_REASON);
            }
        };

        let path = match self.store.put(&id, body, kind.extension()).await {
            Ok(path) => path,
            Err(e) => {
                error!(id = %id, error = %e, "Failed to store upload");
                metrics::record_error("storage");
                return TransferResult::storage(STORAGE_FAILURE_REASON);
            }
        };

        if let Err(e) = self.anonymize(&path).await {
            error!(id = %id, path = %path.display(), error = %e, "Anonymization failed");
            metrics::record_error("detection");
            if let Err(cleanup) = self.store.remove(&path).await {
                error!(path = %path.display(), error = %cleanup, "Failed to remove un-anonymized file");
            }
            return TransferResult::detection(DETECTION_FAILURE_REASON);
        }

        metrics::record_upload_bytes(size as u64);
        info!(id = %id, mime = kind.mime_type(), bytes = size, "Upload stored");
        TransferResult::success(id)
    }

    async fn anonymize(&self, path: &Path) -> Result<(), AnonymizeError> {
        let anonymizer = Arc::clone(&self.anonymizer);
        let target = path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || anonymizer.anonymize(&target))
            .await
            .map_err(|e| AnonymizeError::Write {
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            })??;
        info!(path = %path.display(), faces = report.faces(), "Faces blurred");
        Ok(())
    }

    /// Claim the file for `id` for its one and only download.
    ///
    /// Short, malformed, unknown and already-consumed identifiers all
    /// yield [`StoreError::NotFound`].
    pub async fn retrieve(&self, id: &str) -> Result<Download, StoreError> {
        let result = match self.store.resolve(id).await {
            Some(path) => self.store.take(&path).await,
            None => Err(StoreError::NotFound),
        };

        match &result {
            Ok(download) => {
                info!(
                    id = %id,
                    mime = download.content_type(),
                    bytes = download.size(),
                    "Serving one-time download"
                );
            }
            Err(StoreError::NotFound) => warn!(id = %id, "Download not found"),
            Err(e) => {
                error!(id = %id, error = %e, "Download failed");
                metrics::record_error("storage");
            }
        }
        metrics::record_download(result.is_ok());
        result
    }
}

fn reject(e: FormatError) -> TransferResult {
    match &e {
        FormatError::NotAPicture { detected } => {
            warn!(mime = ?detected, reason = %e, "Upload rejected")
        }
        FormatError::TooBig { size, limit } => {
            warn!(bytes = size, limit = limit, reason = %e, "Upload rejected")
        }
        FormatError::Empty => warn!(reason = %e, "Upload rejected"),
    }
    TransferResult::validation(e.to_string())
}
