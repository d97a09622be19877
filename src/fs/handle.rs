//! File handles handed to the HTTP layer.
//!
//! A handle is either a synthetic directory (existence only, no stream) or
//! a resolved object.  Handles are created per request and dropped once the
//! response has been written.

use std::sync::Arc;
use std::time::SystemTime;

use super::path::base_name;
use super::resolver::{CandidateKind, Resolved};
use crate::errors::FsError;
use crate::storage::backend::{ByteStream, ObjectInfo, ObjectStore, RemoteObject};

/// Metadata the HTTP layer needs to serve a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Last path segment.
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Result of [`crate::fs::BucketFs::open`].
#[derive(Debug)]
pub enum FileHandle {
    Directory(DirectoryHandle),
    Object(ObjectFile),
}

impl FileHandle {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileHandle::Directory(_))
    }

    pub fn stat(&self) -> FileStat {
        match self {
            FileHandle::Directory(dir) => dir.stat(),
            FileHandle::Object(file) => file.stat(),
        }
    }

    /// Directory entries; objects have none.
    pub fn read_dir(&self) -> Vec<FileStat> {
        match self {
            FileHandle::Directory(dir) => dir.read_dir(),
            FileHandle::Object(_) => Vec::new(),
        }
    }

    /// Stream the content, optionally restricted to an inclusive byte range.
    pub async fn read(&self, range: Option<(u64, u64)>) -> Result<ByteStream, FsError> {
        match self {
            FileHandle::Directory(dir) => Err(FsError::IsDirectory {
                path: dir.prefix.clone(),
            }),
            FileHandle::Object(file) => file.read(range).await,
        }
    }
}

/// A prefix known to have objects beneath it.
pub struct DirectoryHandle {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl DirectoryHandle {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    /// Request path with the trailing separator stripped.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            name: base_name(&self.prefix).to_string(),
            size: 0,
            modified: None,
            is_dir: true,
            content_type: None,
            etag: None,
        }
    }

    /// Always empty: only the existence of a directory matters, content is
    /// found through the fallback chain.
    pub fn read_dir(&self) -> Vec<FileStat> {
        Vec::new()
    }
}

impl std::fmt::Debug for DirectoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryHandle")
            .field("bucket", &self.store.bucket())
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// A resolved object together with its stat result.
#[derive(Debug)]
pub struct ObjectFile {
    object: RemoteObject,
    info: ObjectInfo,
    kind: CandidateKind,
}

impl ObjectFile {
    pub fn key(&self) -> &str {
        self.object.key()
    }

    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    /// Which link of the fallback chain produced this object.
    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// True when this is the site-wide not-found document.
    pub fn is_not_found_document(&self) -> bool {
        self.kind == CandidateKind::NotFoundDocument
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            name: base_name(self.object.key()).to_string(),
            size: self.info.size,
            modified: self.info.last_modified,
            is_dir: false,
            content_type: self.info.content_type.clone(),
            etag: self.info.etag.clone(),
        }
    }

    pub async fn read(&self, range: Option<(u64, u64)>) -> Result<ByteStream, FsError> {
        self.object.read(range).await.map_err(|source| FsError::Read {
            path: self.object.key().to_string(),
            source,
        })
    }
}

impl From<Resolved> for ObjectFile {
    fn from(resolved: Resolved) -> Self {
        Self {
            object: resolved.object,
            info: resolved.info,
            kind: resolved.kind,
        }
    }
}
