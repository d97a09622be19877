//! s3www library -- serve a static website straight out of an S3 bucket.
//!
//! The bucket's flat key namespace is presented as a directory tree
//! ([`fs::BucketFs`]): prefixes with objects beneath them are directories,
//! everything else is resolved through an index/404 fallback chain.  The
//! HTTP layer ([`server`], [`handlers`]) turns that view into a static file
//! server.

pub mod cache;
pub mod config;
pub mod errors;
pub mod fs;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod tls;

use crate::config::Config;
use crate::fs::BucketFs;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Effective configuration.
    pub config: Config,
    /// Filesystem view of the served bucket.
    pub fs: BucketFs,
}
