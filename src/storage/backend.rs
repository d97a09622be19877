//! Abstract object store contract.
//!
//! Every backend must implement [`ObjectStore`].  The trait is read-only:
//! the website is served straight out of the bucket and nothing is ever
//! written back.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use crate::errors::StoreError;

/// Longest object key accepted by S3-compatible stores, in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// Streamed object content.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// One key returned by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Object metadata as reported by a stat (HEAD) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
    /// Quoted entity tag, as returned by the backend.
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

/// Async, read-only object store bound to a single bucket.
pub trait ObjectStore: Send + Sync + 'static {
    /// Name of the bucket this store reads from.
    fn bucket(&self) -> &str;

    /// Lazily list the objects whose key starts with `prefix`.
    ///
    /// Pages are fetched on demand; dropping the stream stops the listing.
    fn list_objects(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry, StoreError>>;

    /// Fetch the metadata of the object at `key`.
    fn stat_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectInfo, StoreError>> + Send + '_>>;

    /// Stream the object at `key`, optionally restricted to the inclusive
    /// byte range `(start, end)`.
    fn read_object(
        &self,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, StoreError>> + Send + '_>>;
}

/// Check that `key` can name an object at all.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.len() > MAX_KEY_LEN {
        "key is longer than 1024 bytes"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

/// An opened, not yet inspected, object.
///
/// Opening only validates the key; no request reaches the backend until
/// [`RemoteObject::stat`] or [`RemoteObject::read`] is called.
#[derive(Clone)]
pub struct RemoteObject {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl RemoteObject {
    pub fn open(store: Arc<dyn ObjectStore>, key: &str) -> Result<Self, StoreError> {
        validate_key(key)?;
        Ok(Self {
            store,
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    pub async fn stat(&self) -> Result<ObjectInfo, StoreError> {
        self.store.stat_object(&self.key).await
    }

    pub async fn read(&self, range: Option<(u64, u64)>) -> Result<ByteStream, StoreError> {
        self.store.read_object(&self.key, range).await
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("bucket", &self.store.bucket())
            .field("key", &self.key)
            .finish()
    }
}
