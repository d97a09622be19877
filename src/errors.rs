//! Error types for the object store, the filesystem adapter, and the
//! HTTP layer.
//!
//! Backend failures are described by [`StoreError`].  They never cross the
//! adapter boundary as such: [`crate::fs::BucketFs`] absorbs them and only
//! hands [`FsError`] to the HTTP layer, which maps it onto [`HttpError`].
//! [`HttpError`] implements [`axum::response::IntoResponse`] so handlers
//! can simply return `Err(HttpError::NotFound)`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors reported by an [`crate::storage::backend::ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key can never name an object (empty, too long).
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The named object does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey { key: String },

    /// Transport, authentication or any other backend failure.
    #[error("object store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl StoreError {
    /// True when the backend positively reported the object as missing.
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, StoreError::NoSuchKey { .. })
    }
}

/// Errors surfaced by [`crate::fs::BucketFs`] to the HTTP layer.
#[derive(Debug, Error)]
pub enum FsError {
    /// No fallback candidate could be resolved.
    #[error("resource does not exist: {path}")]
    NotFound { path: String },

    /// Byte access was requested on a directory handle.
    #[error("is a directory: {path}")]
    IsDirectory { path: String },

    /// The object resolved but its content stream could not be opened.
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// HTTP-facing errors.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("404 page not found")]
    NotFound,

    #[error("405 method not allowed")]
    MethodNotAllowed,

    /// 304 for a satisfied `If-None-Match` / `If-Modified-Since`.
    #[error("Not Modified")]
    NotModified,

    #[error("412 precondition failed")]
    PreconditionFailed,

    /// Range header could not be satisfied against an object of `size` bytes.
    #[error("416 requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("500 internal server error")]
    Internal(#[from] anyhow::Error),
}

impl HttpError {
    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::NotFound => StatusCode::NOT_FOUND,
            HttpError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::NotModified => StatusCode::NOT_MODIFIED,
            HttpError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            HttpError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FsError> for HttpError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound { .. } => HttpError::NotFound,
            other => HttpError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let HttpError::Internal(ref err) = self {
            tracing::error!("request failed: {err:#}");
        }

        // 304 Not Modified responses must not have a body.
        if matches!(self, HttpError::NotModified) {
            return status.into_response();
        }

        let mut response = (
            status,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            format!("{self}\n"),
        )
            .into_response();

        match self {
            HttpError::MethodNotAllowed => {
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            }
            HttpError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }

        response
    }
}
