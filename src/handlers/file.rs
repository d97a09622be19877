//! Static file serving over the bucket filesystem.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::debug;

use crate::errors::HttpError;
use crate::fs::path::{base_name, clean, is_root};
use crate::fs::{DirectoryHandle, FileHandle, FileStat, ObjectFile};
use crate::AppState;

/// Document served for a directory URL.
const INDEX_PAGE: &str = "/index.html";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Stored content types that say nothing about the content.
const GENERIC_CONTENT_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

/// Characters escaped in a redirect target.
const LOCATION_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Fallback handler: serve `uri` out of the bucket.
pub async fn serve(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(HttpError::MethodNotAllowed);
    }
    let head = method == Method::HEAD;

    let mut url_path = percent_decode_str(uri.path())
        .decode_utf8_lossy()
        .into_owned();
    if !url_path.starts_with('/') {
        url_path.insert(0, '/');
    }

    // Index documents are only ever addressed through their directory.
    if url_path.ends_with(INDEX_PAGE) {
        return local_redirect("./", uri.query());
    }

    let name = clean(&url_path);
    match state.fs.open(&name).await? {
        FileHandle::Directory(dir) => {
            if !url_path.ends_with('/') {
                let target = format!("{}/", base_name(&url_path));
                return local_redirect(&target, uri.query());
            }

            let index = format!("{}{}", dir.prefix(), INDEX_PAGE);
            match state.fs.resolve(&index).await {
                Ok(file) if !file.is_not_found_document() => {
                    serve_object(&file, &headers, head).await
                }
                _ => directory_listing(&dir, head),
            }
        }
        FileHandle::Object(file) if file.is_not_found_document() => {
            debug!("Serving not-found document for {:?}", name);
            serve_not_found_document(&file, head).await
        }
        FileHandle::Object(file) => {
            if url_path.ends_with('/') && !is_root(&url_path) {
                let target = format!("../{}", base_name(&url_path));
                return local_redirect(&target, uri.query());
            }
            serve_object(&file, &headers, head).await
        }
    }
}

/// Serve an object honoring conditional and range headers.
async fn serve_object(
    file: &ObjectFile,
    headers: &HeaderMap,
    head: bool,
) -> Result<Response, HttpError> {
    let stat = file.stat();
    let etag = stat.etag.as_deref();
    let modified = stat.modified.map(truncate_to_secs);

    match evaluate_conditions(headers, etag, modified) {
        Ok(()) => {}
        Err(HttpError::NotModified) => return not_modified(etag, modified),
        Err(e) => return Err(e),
    }

    let size = stat.size;
    let mut range = None;
    if let Some(range_hdr) = header_str(headers, header::RANGE) {
        if if_range_allows(headers, etag, modified) {
            // Malformed or multi-range headers are ignored.
            if let Some(byte_range) = parse_range_header(range_hdr) {
                let resolved = resolve_range(&byte_range, size)
                    .ok_or(HttpError::RangeNotSatisfiable { size })?;
                range = Some(resolved);
            }
        }
    }

    let (status, content_length) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, end - start + 1),
        None => (StatusCode::OK, size),
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    let hdrs = response.headers_mut();
    insert_header(hdrs, header::CONTENT_TYPE, &content_type_for(&stat));
    hdrs.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    hdrs.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some((start, end)) = range {
        insert_header(
            hdrs,
            header::CONTENT_RANGE,
            &format!("bytes {start}-{end}/{size}"),
        );
    }
    insert_validators(hdrs, etag, modified);

    if !head {
        *response.body_mut() = Body::from_stream(file.read(range).await?);
    }
    Ok(response)
}

/// Serve the site-wide not-found document with a 404 status.
///
/// A plain file server cannot tell this document apart from the page that
/// was asked for and answers 200; here it is always a 404, without
/// validators, and ranges and conditionals are ignored.  A directory with
/// no index page does not land here: it gets its listing instead.
async fn serve_not_found_document(file: &ObjectFile, head: bool) -> Result<Response, HttpError> {
    let stat = file.stat();

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_FOUND;
    let hdrs = response.headers_mut();
    insert_header(hdrs, header::CONTENT_TYPE, &content_type_for(&stat));
    hdrs.insert(header::CONTENT_LENGTH, HeaderValue::from(stat.size));

    if !head {
        *response.body_mut() = Body::from_stream(file.read(None).await?);
    }
    Ok(response)
}

fn not_modified(etag: Option<&str>, modified: Option<SystemTime>) -> Result<Response, HttpError> {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    insert_validators(response.headers_mut(), etag, modified);
    Ok(response)
}

fn directory_listing(dir: &DirectoryHandle, head: bool) -> Result<Response, HttpError> {
    let html = render_listing(&dir.read_dir());
    let length = html.len() as u64;
    let body = if head { Body::empty() } else { Body::from(html) };

    let mut response = Response::new(body);
    let hdrs = response.headers_mut();
    hdrs.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    hdrs.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// HTML listing of `entries`; directory names carry a trailing `/`.
fn render_listing(entries: &[FileStat]) -> String {
    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for entry in entries {
        let mut name = entry.name.clone();
        if entry.is_dir {
            name.push('/');
        }
        let href = utf8_percent_encode(&name, LOCATION_SET).to_string();
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            escape_html(&href),
            escape_html(&name)
        ));
    }
    html.push_str("</pre>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// 301 to a location relative to the request URL, keeping the query string.
fn local_redirect(target: &str, query: Option<&str>) -> Result<Response, HttpError> {
    let mut location = utf8_percent_encode(target, LOCATION_SET).to_string();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(query);
    }
    let value = HeaderValue::from_str(&location)
        .map_err(|e| HttpError::Internal(anyhow::Error::new(e)))?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn insert_validators(headers: &mut HeaderMap, etag: Option<&str>, modified: Option<SystemTime>) {
    if let Some(etag) = etag {
        insert_header(headers, header::ETAG, etag);
    }
    if let Some(modified) = modified {
        insert_header(
            headers,
            header::LAST_MODIFIED,
            &httpdate::fmt_http_date(modified),
        );
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// HTTP dates carry whole seconds only.
fn truncate_to_secs(time: SystemTime) -> SystemTime {
    time.duration_since(UNIX_EPOCH)
        .map(|d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
        .unwrap_or(time)
}

// -- Content type -------------------------------------------------------------

/// Content type to send for `stat`: the stored type unless it is generic,
/// then a guess from the file extension, then `application/octet-stream`.
pub fn content_type_for(stat: &FileStat) -> String {
    if let Some(stored) = stat.content_type.as_deref().map(str::trim) {
        let essence = stored.split(';').next().unwrap_or("").trim();
        if !GENERIC_CONTENT_TYPES
            .iter()
            .any(|generic| essence.eq_ignore_ascii_case(generic))
        {
            return stored.to_string();
        }
    }
    guess_content_type(&stat.name)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Content type for a file name's extension, if known.
pub fn guess_content_type(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "xml" => "text/xml; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/vnd.microsoft.icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    };
    Some(content_type)
}

// -- Range parsing ------------------------------------------------------------

/// Parsed byte range from a Range header.
#[derive(Debug, Clone, PartialEq)]
enum ByteRange {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-
    StartOpen(u64),
    /// bytes=-N (last N bytes)
    Suffix(u64),
}

/// Parse a Range header value like "bytes=0-4", "bytes=5-", "bytes=-3".
/// Returns None if the header is not a single valid bytes range.
fn parse_range_header(range_str: &str) -> Option<ByteRange> {
    let spec = range_str.trim().strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(ByteRange::Suffix(n))
    } else if let Some(start) = spec.strip_suffix('-') {
        Some(ByteRange::StartOpen(start.parse().ok()?))
    } else {
        let (start, end) = spec.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::StartEnd(start, end))
    }
}

/// Resolve a ByteRange against a total content length.
/// Returns inclusive (start, end), or None if unsatisfiable.
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::StartEnd(start, end) if start < total => Some((start, end.min(total - 1))),
        ByteRange::StartOpen(start) if start < total => Some((start, total - 1)),
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
        _ => None,
    }
}

// -- Conditional request evaluation -------------------------------------------

/// Strip surrounding double quotes from an ETag string for comparison.
fn strip_etag_quotes(etag: &str) -> &str {
    let etag = etag.trim();
    if etag.len() >= 2 && etag.starts_with('"') && etag.ends_with('"') {
        &etag[1..etag.len() - 1]
    } else {
        etag
    }
}

/// Whether any entity tag listed in `header_value` matches `etag`.
///
/// `weak` selects weak comparison (If-None-Match); otherwise tags carrying
/// a `W/` prefix never match.
fn etag_matches(header_value: &str, etag: Option<&str>, weak: bool) -> bool {
    if header_value.trim() == "*" {
        return true;
    }
    let Some(etag) = etag else {
        return false;
    };
    let (etag, etag_is_weak) = match etag.trim().strip_prefix("W/") {
        Some(stripped) => (stripped, true),
        None => (etag, false),
    };
    if etag_is_weak && !weak {
        return false;
    }
    let target = strip_etag_quotes(etag);

    header_value.split(',').map(str::trim).any(|candidate| {
        let (candidate, is_weak) = match candidate.strip_prefix("W/") {
            Some(stripped) => (stripped, true),
            None => (candidate, false),
        };
        (weak || !is_weak) && strip_etag_quotes(candidate) == target
    })
}

/// Check If-Match / If-Unmodified-Since / If-None-Match / If-Modified-Since.
///
/// Evaluation priority:
///   1. If-Match (412 on failure)
///   2. If-Unmodified-Since (412), only when If-Match is absent
///   3. If-None-Match (304 on match)
///   4. If-Modified-Since (304 when unchanged), only when If-None-Match is absent
fn evaluate_conditions(
    headers: &HeaderMap,
    etag: Option<&str>,
    modified: Option<SystemTime>,
) -> Result<(), HttpError> {
    if let Some(if_match) = header_str(headers, header::IF_MATCH) {
        if !etag_matches(if_match, etag, false) {
            return Err(HttpError::PreconditionFailed);
        }
    } else if let Some(if_unmodified) = header_str(headers, header::IF_UNMODIFIED_SINCE) {
        if let (Some(obj_time), Ok(threshold)) = (modified, httpdate::parse_http_date(if_unmodified))
        {
            if obj_time > threshold {
                return Err(HttpError::PreconditionFailed);
            }
        }
    }

    if let Some(if_none_match) = header_str(headers, header::IF_NONE_MATCH) {
        if etag_matches(if_none_match, etag, true) {
            return Err(HttpError::NotModified);
        }
    } else if let Some(if_modified) = header_str(headers, header::IF_MODIFIED_SINCE) {
        if let (Some(obj_time), Ok(threshold)) = (modified, httpdate::parse_http_date(if_modified)) {
            if obj_time <= threshold {
                return Err(HttpError::NotModified);
            }
        }
    }

    Ok(())
}

/// Whether a Range header may be honored given If-Range.
fn if_range_allows(headers: &HeaderMap, etag: Option<&str>, modified: Option<SystemTime>) -> bool {
    let Some(value) = header_str(headers, header::IF_RANGE) else {
        return true;
    };
    let value = value.trim();
    if value.starts_with('"') || value.starts_with("W/") {
        return etag_matches(value, etag, false);
    }
    match (modified, httpdate::parse_http_date(value)) {
        (Some(obj_time), Ok(date)) => obj_time == date,
        _ => false,
    }
}

// -- Unit tests ---------------------------------------------------------------
