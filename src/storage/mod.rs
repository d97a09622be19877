//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where the website's
//! objects live.  [`s3::S3Backend`] talks to S3 and S3-compatible servers;
//! [`memory::MemoryStore`] keeps a bucket in memory.

pub mod backend;
pub mod memory;
pub mod s3;
