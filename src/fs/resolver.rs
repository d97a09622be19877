//! Fallback chain from a request path to a concrete object.
//!
//! A request for `path` is answered by the first of these objects that
//! exists:
//!
//! 1. `path` itself
//! 2. `path/index.html`
//! 3. `path/index.htm`
//! 4. `/404.html`, the site-wide not-found document
//!
//! Candidates are probed one at a time, in order, and the scan stops at the
//! first hit.  Backend errors never escape: a candidate that cannot be
//! opened or stat'ed is skipped.

use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

use super::path::{object_key, SEPARATOR};
use crate::errors::{FsError, StoreError};
use crate::metrics::RESOLUTIONS_TOTAL;
use crate::storage::backend::{ObjectInfo, ObjectStore, RemoteObject};

/// Path of the site-wide not-found document.
pub const NOT_FOUND_DOCUMENT: &str = "/404.html";

/// Which link of the fallback chain a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Exact,
    IndexHtml,
    IndexHtm,
    NotFoundDocument,
}

impl CandidateKind {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Exact => "exact",
            CandidateKind::IndexHtml => "index_html",
            CandidateKind::IndexHtm => "index_htm",
            CandidateKind::NotFoundDocument => "not_found_document",
        }
    }
}

/// One object key to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub key: String,
}

/// The first candidate that opened and stat'ed successfully.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub object: RemoteObject,
    pub info: ObjectInfo,
    pub kind: CandidateKind,
}

/// Build the four candidates for `path`, in probe order.
pub fn candidates(path: &str) -> [Candidate; 4] {
    let base = path.trim_end_matches(SEPARATOR);
    let candidate = |kind, raw: &str| Candidate {
        kind,
        key: object_key(raw).to_string(),
    };
    [
        candidate(CandidateKind::Exact, path),
        candidate(CandidateKind::IndexHtml, &format!("{base}/index.html")),
        candidate(CandidateKind::IndexHtm, &format!("{base}/index.htm")),
        candidate(CandidateKind::NotFoundDocument, NOT_FOUND_DOCUMENT),
    ]
}

/// Walk the fallback chain for `path` (object form).
pub async fn resolve(store: &Arc<dyn ObjectStore>, path: &str) -> Result<Resolved, FsError> {
    for candidate in candidates(path) {
        let object = match RemoteObject::open(store.clone(), &candidate.key) {
            Ok(object) => object,
            Err(e) => {
                warn!("Skipping candidate {:?}: {}", candidate.key, e);
                continue;
            }
        };

        let info = match object.stat().await {
            Ok(info) => info,
            Err(e) => {
                log_stat_failure(&candidate, &e);
                continue;
            }
        };

        counter!(RESOLUTIONS_TOTAL, "outcome" => candidate.kind.as_str()).increment(1);
        return Ok(Resolved {
            object,
            info,
            kind: candidate.kind,
        });
    }

    counter!(RESOLUTIONS_TOTAL, "outcome" => "not_found").increment(1);
    Err(FsError::NotFound {
        path: path.to_string(),
    })
}

fn log_stat_failure(candidate: &Candidate, err: &StoreError) {
    match err {
        // A bucket without a custom 404 page is a normal deployment.
        StoreError::NoSuchKey { .. } if candidate.kind == CandidateKind::NotFoundDocument => {}
        StoreError::NoSuchKey { .. } => info!("{}", err),
        _ => warn!("Failed to stat {:?}: {}", candidate.key, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use std::sync::Mutex;

    /// Log sink shared between a test and its `fmt` subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    async fn store_with(keys: &[&str]) -> (Arc<MemoryStore>, Arc<dyn ObjectStore>) {
        let memory = Arc::new(MemoryStore::new("site"));
        for key in keys {
            memory.put(key, format!("contents of {key}")).await;
        }
        let store: Arc<dyn ObjectStore> = memory.clone();
        (memory, store)
    }

    #[test]
    fn test_candidates_order() {
        let keys: Vec<String> = candidates("blog/post")
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "blog/post",
                "blog/post/index.html",
                "blog/post/index.htm",
                "404.html"
            ]
        );
    }

    #[test]
    fn test_candidates_kinds() {
        let kinds: Vec<CandidateKind> = candidates("a").into_iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CandidateKind::Exact,
                CandidateKind::IndexHtml,
                CandidateKind::IndexHtm,
                CandidateKind::NotFoundDocument
            ]
        );
    }

    #[test]
    fn test_candidates_for_empty_path() {
        let keys: Vec<String> = candidates("").into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["", "index.html", "index.htm", "404.html"]);
    }

    #[tokio::test]
    async fn test_exact_key_wins_without_probing_indexes() {
        let (memory, store) =
            store_with(&["about.html", "about.html/index.html", "404.html"]).await;

        let resolved = resolve(&store, "about.html").await.unwrap();
        assert_eq!(resolved.kind, CandidateKind::Exact);
        assert_eq!(resolved.object.key(), "about.html");
        assert_eq!(resolved.info.key, "about.html");
        assert_eq!(memory.stat_calls(), 1);
    }

    #[tokio::test]
    async fn test_index_html_fallback() {
        let (memory, store) = store_with(&["docs/index.html", "docs/index.htm"]).await;

        let resolved = resolve(&store, "docs").await.unwrap();
        assert_eq!(resolved.kind, CandidateKind::IndexHtml);
        assert_eq!(resolved.object.key(), "docs/index.html");
        assert_eq!(memory.stat_calls(), 2);
    }

    #[tokio::test]
    async fn test_index_htm_fallback() {
        let (_, store) = store_with(&["legacy/index.htm"]).await;

        let resolved = resolve(&store, "legacy").await.unwrap();
        assert_eq!(resolved.kind, CandidateKind::IndexHtm);
        assert_eq!(resolved.object.key(), "legacy/index.htm");
    }

    #[tokio::test]
    async fn test_not_found_document_fallback() {
        let (memory, store) = store_with(&["404.html", "index.html"]).await;

        let resolved = resolve(&store, "missing/page").await.unwrap();
        assert_eq!(resolved.kind, CandidateKind::NotFoundDocument);
        assert_eq!(resolved.object.key(), "404.html");
        assert_eq!(memory.stat_calls(), 4);
    }

    #[tokio::test]
    async fn test_all_candidates_missing_is_not_found() {
        let (memory, store) = store_with(&["index.html"]).await;

        let err = resolve(&store, "missing").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound { ref path } if path == "missing"));
        assert_eq!(memory.stat_calls(), 4);
    }

    #[tokio::test]
    async fn test_invalid_exact_key_is_skipped() {
        let (memory, store) = store_with(&["index.html"]).await;

        // The empty exact key cannot be opened; the index document still resolves.
        let resolved = resolve(&store, "").await.unwrap();
        assert_eq!(resolved.kind, CandidateKind::IndexHtml);
        assert_eq!(memory.stat_calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_outage_is_not_found() {
        let (memory, store) = store_with(&["page.html", "404.html"]).await;
        memory.set_offline(true);

        let err = resolve(&store, "page.html").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
        // Every candidate was still attempted, one at a time.
        assert_eq!(memory.stat_calls(), 4);
    }

    #[tokio::test]
    async fn test_missing_not_found_document_is_not_logged() {
        let (_, store) = store_with(&["index.html"]).await;
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = resolve(&store, "missing").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));

        let output = logs.contents();
        assert!(output.contains("INFO"), "{output}");
        assert!(output.contains("does not exist: missing\n"), "{output}");
        assert!(output.contains("missing/index.html"), "{output}");
        assert!(!output.contains("404.html"), "{output}");
    }
}
