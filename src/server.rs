//! Axum router construction.
//!
//! The [`app`] function returns a ready-to-serve [`axum::Router`].  There
//! are no routes: every path is a potential object key, so a single
//! fallback handler ([`crate::handlers::file::serve`]) answers everything.

use axum::{
    http::{header, HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::file;
use crate::metrics::metrics_middleware;
use crate::AppState;

/// Build the axum [`Router`] serving the bucket.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(file::serve)
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `Date` and `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(date) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, date);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("s3www"));

    response
}

// -- Tests --------------------------------------------------------------------
