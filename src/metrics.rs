//! Prometheus metrics for s3www.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` and `/healthz` endpoints on their own
//! router so they never shadow objects in the bucket.

use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "s3www_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "s3www_http_request_duration_seconds";

/// Directory cache lookups (counter). Labels: result (`hit` | `miss`).
pub const DIR_CACHE_LOOKUPS_TOTAL: &str = "s3www_dir_cache_lookups_total";

/// Prefix listings issued to the backend (counter).
pub const DIR_LISTINGS_TOTAL: &str = "s3www_dir_listings_total";

/// Fallback-chain resolutions (counter). Labels: outcome.
pub const RESOLUTIONS_TOTAL: &str = "s3www_resolutions_total";

// -- Global recorder installation ---------------------------------------------

/// `None` when installing the recorder failed.
static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder. Idempotent, so tests may call it
/// more than once.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("failed to install Prometheus recorder: {e}");
                None
            }
        })
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Prometheus recorder is not installed"))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        DIR_CACHE_LOOKUPS_TOTAL,
        "Directory cache lookups by result"
    );
    describe_counter!(
        DIR_LISTINGS_TOTAL,
        "Prefix listings issued to detect directories"
    );
    describe_counter!(RESOLUTIONS_TOTAL, "Path resolutions by outcome");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Request paths are not used as labels: every path is a potential object
/// key and would blow up cardinality.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method).record(duration);

    response
}

// -- Observability endpoints --------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get().and_then(Option::as_ref) {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled\n").into_response(),
    }
}

/// `GET /healthz` -- Liveness probe.
pub async fn health_handler() -> &'static str {
    "ok"
}

/// Router served on the observability listener.
pub fn observability_app() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let response = observability_app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_counters() {
        init_metrics().unwrap();
        describe_metrics();
        counter!(DIR_LISTINGS_TOTAL).increment(1);

        let response = observability_app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(DIR_LISTINGS_TOTAL));
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics().unwrap() as *const PrometheusHandle;
        let second = init_metrics().unwrap() as *const PrometheusHandle;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let response = observability_app()
            .oneshot(Request::get("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
