//! HTTP request handlers.
//!
//! Every request is served by [`file::serve`], installed as the router's
//! fallback: the whole URL space maps onto the bucket.

pub mod file;
