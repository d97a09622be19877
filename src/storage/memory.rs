//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<BTreeMap<...>>` so prefix
//! listings come back in key order, like S3.  The store counts the
//! backend calls it receives and can be switched offline to simulate an
//! unreachable backend, which makes it the test double for everything
//! above the storage layer.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use super::backend::{ByteStream, ObjectEntry, ObjectInfo, ObjectStore};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    last_modified: SystemTime,
}

/// Object store that keeps a single bucket in memory.
pub struct MemoryStore {
    bucket: String,
    objects: tokio::sync::RwLock<BTreeMap<String, MemoryObject>>,
    list_calls: AtomicUsize,
    stat_calls: AtomicUsize,
    read_calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: tokio::sync::RwLock::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            stat_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Store `data` under `key` without an explicit content type.
    pub async fn put(&self, key: &str, data: impl Into<Bytes>) {
        self.put_with_content_type(key, data, None).await;
    }

    /// Store `data` under `key`, replacing any previous object.
    pub async fn put_with_content_type(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) {
        let data = data.into();
        let object = MemoryObject {
            etag: Self::compute_etag(&data),
            data,
            content_type: content_type.map(str::to_string),
            last_modified: SystemTime::now(),
        };
        self.objects.write().await.insert(key.to_string(), object);
    }

    /// Override the modification time of an existing object.
    pub async fn set_last_modified(&self, key: &str, when: SystemTime) {
        if let Some(object) = self.objects.write().await.get_mut(key) {
            object.last_modified = when;
        }
    }

    pub async fn remove(&self, key: &str) {
        self.objects.write().await.remove(key);
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `list_objects` calls received so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `stat_object` calls received so far.
    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    /// Number of `read_object` calls received so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "memory store {} is offline",
                self.bucket
            )));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_objects(&self, prefix: &str) -> BoxStream<'_, Result<ObjectEntry, StoreError>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.check_online() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let prefix = prefix.to_string();
        stream::once(async move {
            let objects = self.objects.read().await;
            objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, object)| {
                    Ok(ObjectEntry {
                        key: key.clone(),
                        size: object.data.len() as u64,
                    })
                })
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    fn stat_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectInfo, StoreError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.stat_calls.fetch_add(1, Ordering::SeqCst);
            self.check_online()?;

            let objects = self.objects.read().await;
            let object = objects
                .get(&key)
                .ok_or_else(|| StoreError::NoSuchKey { key: key.clone() })?;

            Ok(ObjectInfo {
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                etag: Some(object.etag.clone()),
                content_type: object.content_type.clone(),
                key,
            })
        })
    }

    fn read_object(
        &self,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, StoreError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            self.check_online()?;

            let data = self
                .objects
                .read()
                .await
                .get(&key)
                .map(|object| object.data.clone())
                .ok_or_else(|| StoreError::NoSuchKey { key: key.clone() })?;

            let data = match range {
                Some((start, end)) => {
                    let len = data.len() as u64;
                    if start >= len || start > end {
                        return Err(StoreError::Unavailable(anyhow::anyhow!(
                            "range {start}-{end} outside of {key} ({len} bytes)"
                        )));
                    }
                    let end = end.min(len - 1);
                    data.slice(start as usize..(end + 1) as usize)
                }
                None => data,
            };

            let body: ByteStream = stream::once(async move { Ok(data) }).boxed();
            Ok(body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_objects_by_prefix_in_key_order() {
        let store = MemoryStore::new("site");
        store.put("blog/b.html", "b").await;
        store.put("blog/a.html", "a").await;
        store.put("blogroll.html", "r").await;
        store.put("about.html", "x").await;

        let keys: Vec<String> = store
            .list_objects("blog/")
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["blog/a.html", "blog/b.html"]);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_objects_empty_prefix_match() {
        let store = MemoryStore::new("site");
        store.put("index.html", "home").await;

        let mut listing = store.list_objects("nothing/");
        assert!(listing.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stat_object_reports_metadata() {
        let store = MemoryStore::new("site");
        store
            .put_with_content_type("style.css", "body{}", Some("text/css"))
            .await;

        let info = store.stat_object("style.css").await.unwrap();
        assert_eq!(info.key, "style.css");
        assert_eq!(info.size, 6);
        assert_eq!(info.content_type.as_deref(), Some("text/css"));
        assert!(info.last_modified.is_some());
        let etag = info.etag.unwrap();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
    }

    #[tokio::test]
    async fn test_stat_object_missing_is_no_such_key() {
        let store = MemoryStore::new("site");
        let err = store.stat_object("404.html").await.unwrap_err();
        assert!(err.is_no_such_key());
    }

    #[tokio::test]
    async fn test_read_object_full_and_range() {
        let store = MemoryStore::new("site");
        store.put("hello.txt", "hello world").await;

        let full = store.read_object("hello.txt", None).await.unwrap();
        assert_eq!(collect(full).await, b"hello world");

        let part = store.read_object("hello.txt", Some((6, 10))).await.unwrap();
        assert_eq!(collect(part).await, b"world");
        assert_eq!(store.read_calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryStore::new("site");
        store.put("index.html", "home").await;
        store.set_offline(true);

        assert!(matches!(
            store.stat_object("index.html").await,
            Err(StoreError::Unavailable(_))
        ));
        let first = store.list_objects("").next().await.unwrap();
        assert!(matches!(first, Err(StoreError::Unavailable(_))));

        store.set_offline(false);
        assert!(store.stat_object("index.html").await.is_ok());
    }
}
