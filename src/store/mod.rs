//! Sharded on-disk store
//!
//! Files live under `<root>/<id[0..2]>/<id[2..4]>/<id><ext>`. There is no
//! index: an identifier is resolved by scanning its shard directory for a
//! name starting with it. Two levels of hex sharding spread files over up to
//! 65536 directories, so each scan only sees a handful of entries; the scan
//! stays linear in shard occupancy, which is the scalability ceiling of this
//! layout.
//!
//! Writes are staged under a dot-prefixed temporary name and renamed into
//! place, so a concurrent [`ShardedStore::resolve`] never sees a partially
//! written file. Dot-prefixed names can never match a hex identifier.
//!
//! A crash can strand a staging file or a claimed download. Hidden entries
//! older than [`STALE_AFTER`] are swept when the server starts, and again
//! whenever `resolve` walks past one.

mod download;

pub use download::{Download, CHUNK_SIZE};

use crate::identifier;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

/// Age after which a hidden staging or claimed file is considered orphaned
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Failed to create shard directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("File not found")]
    NotFound,

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Content-addressed, self-expiring image store
#[derive(Debug, Clone)]
pub struct ShardedStore {
    root: PathBuf,
}

impl ShardedStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Two-level shard directory for an identifier (or identifier prefix).
    ///
    /// Callers must have checked the identifier is well formed.
    pub fn shard_dir(&self, id: &str) -> PathBuf {
        self.root.join(&id[0..2]).join(&id[2..4])
    }

    /// Final location of a stored file
    pub fn path_for(&self, id: &str, extension: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{id}{extension}"))
    }

    /// Persist `bytes` as `<shard>/<id><extension>`.
    ///
    /// The shard directory is created if missing; a directory that already
    /// exists (including one created concurrently) is not an error.
    pub async fn put(&self, id: &str, bytes: Bytes, extension: &str) -> Result<PathBuf, StoreError> {
        if !identifier::is_well_formed(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }

        let dir = self.shard_dir(id);
        create_shard_dir(&dir).await?;

        let path = self.path_for(id, extension);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| StoreError::Write {
                path: path.clone(),
                source: io::Error::other(e),
            })?
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "Stored file");
        Ok(path)
    }

    /// Find the stored file whose name starts with `prefix`.
    ///
    /// Prefixes shorter than a full identifier, or containing anything but
    /// lowercase hex, resolve to nothing without touching the filesystem.
    pub async fn resolve(&self, prefix: &str) -> Option<PathBuf> {
        if !identifier::is_well_formed(prefix) {
            return None;
        }

        let dir = self.shard_dir(prefix);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to scan shard directory");
                return None;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else {
                        continue;
                    };
                    if name.starts_with(prefix) {
                        return Some(entry.path());
                    }
                    if name.starts_with('.') {
                        remove_if_stale(&entry.path(), STALE_AFTER).await;
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to read shard entry");
                    return None;
                }
            }
        }
    }

    /// Claim a stored file for its one and only download.
    ///
    /// The file stops being resolvable immediately and is deleted when the
    /// returned [`Download`] is dropped. When two callers race for the same
    /// file, exactly one gets it and the other sees [`StoreError::NotFound`].
    pub async fn take(&self, path: &Path) -> Result<Download, StoreError> {
        Download::claim(path).await
    }

    /// Delete hidden entries older than `max_age` from every shard.
    ///
    /// Returns how many were removed. Unreadable directories are skipped.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        for level1 in subdirs(&self.root).await {
            for shard in subdirs(&level1).await {
                let Ok(mut entries) = tokio::fs::read_dir(&shard).await else {
                    continue;
                };
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
                    if hidden && remove_if_stale(&entry.path(), max_age).await {
                        removed += 1;
                    }
                }
            }
        }
        if removed > 0 {
            warn!(root = %self.root.display(), removed, "Swept orphaned files");
        }
        removed
    }

    /// Delete a stored file; a file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return dirs;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs
}

/// Remove `path` if it was last modified more than `max_age` ago.
async fn remove_if_stale(path: &Path, max_age: Duration) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok());
    if !age.is_some_and(|age| age >= max_age) {
        return false;
    }

    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed orphaned file");
            true
        }
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned file");
            }
            false
        }
    }
}

async fn create_shard_dir(dir: &Path) -> Result<(), StoreError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);

    match builder.create(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(StoreError::CreateDir {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Replace `path` with `bytes` without ever exposing a partial file.
///
/// The content is written to a hidden sibling first and renamed over the
/// target, which is atomic within one directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let staging = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = File::create(&staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&staging, path)
    })();

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "Failed to clean up staging file");
            }
        }
    }

    result
}
