//! Filesystem view of a bucket.
//!
//! [`BucketFs`] makes a flat key namespace look like a directory tree for
//! the purpose of serving files over HTTP:
//!
//! - a path is a *directory* when at least one object lives under its
//!   prefix ([`BucketFs::is_dir`], answers cached in [`DirCache`]);
//! - anything else goes through the fallback chain in [`resolver`].
//!
//! Backend failures are absorbed here; callers only ever see a
//! [`FileHandle`] or an [`FsError`].

pub mod handle;
pub mod path;
pub mod resolver;

use futures::StreamExt;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

pub use handle::{DirectoryHandle, FileHandle, FileStat, ObjectFile};

use crate::cache::DirCache;
use crate::errors::FsError;
use crate::metrics::{DIR_CACHE_LOOKUPS_TOTAL, DIR_LISTINGS_TOTAL};
use crate::storage::backend::ObjectStore;

/// Read-only filesystem over one bucket.
pub struct BucketFs {
    store: Arc<dyn ObjectStore>,
    cache: Arc<DirCache>,
}

impl BucketFs {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<DirCache>) -> Self {
        Self { store, cache }
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    pub fn cache(&self) -> &Arc<DirCache> {
        &self.cache
    }

    /// Whether `path` names a prefix with at least one object beneath it.
    ///
    /// The root is always a directory.  Other answers come from the cache
    /// or, on a miss, from a prefix listing that is abandoned as soon as
    /// its first entry arrives.  When the listing fails the answer is
    /// `false` for this request only: failures are not cached.
    pub async fn is_dir(&self, path: &str) -> bool {
        let key = path::dir_key(path);
        if key == "/" {
            return true;
        }

        if let Some(has_contents) = self.cache.get(&key) {
            counter!(DIR_CACHE_LOOKUPS_TOTAL, "result" => "hit").increment(1);
            return has_contents;
        }
        counter!(DIR_CACHE_LOOKUPS_TOTAL, "result" => "miss").increment(1);

        counter!(DIR_LISTINGS_TOTAL).increment(1);
        let mut listing = self.store.list_objects(&key);
        let first = listing.next().await;
        // Only the first entry matters; dropping the stream stops the listing.
        drop(listing);

        let has_contents = match first {
            Some(Ok(_)) => true,
            None => false,
            Some(Err(e)) => {
                warn!("Cannot tell whether {:?} is a directory: {}", key, e);
                return false;
            }
        };

        debug!("Caching directory answer {:?} -> {}", key, has_contents);
        self.cache.set(&key, has_contents);
        has_contents
    }

    /// Resolve `path` through the fallback chain, skipping the directory check.
    pub async fn resolve(&self, path: &str) -> Result<ObjectFile, FsError> {
        let resolved = resolver::resolve(&self.store, path::object_key(path)).await?;
        Ok(resolved.into())
    }

    /// Open `path` as a directory or as a resolved object.
    pub async fn open(&self, path: &str) -> Result<FileHandle, FsError> {
        if self.is_dir(path).await {
            let prefix = path.strip_suffix(path::SEPARATOR).unwrap_or(path);
            return Ok(FileHandle::Directory(DirectoryHandle::new(
                self.store.clone(),
                prefix.to_string(),
            )));
        }

        let file = self.resolve(path).await.map_err(|e| match e {
            FsError::NotFound { .. } => FsError::NotFound {
                path: path.to_string(),
            },
            other => other,
        })?;
        Ok(FileHandle::Object(file))
    }
}
