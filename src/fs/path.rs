//! Path normalization over the flat key namespace.

/// Separator used both in request paths and object keys.
pub const SEPARATOR: char = '/';

/// Directory form of `path`: surrounding separators trimmed, exactly one
/// trailing separator appended.  The root becomes `"/"`.
pub fn dir_key(path: &str) -> String {
    let mut key = path.trim_matches(SEPARATOR).to_string();
    key.push(SEPARATOR);
    key
}

/// True when `path` normalizes to the bucket root.
pub fn is_root(path: &str) -> bool {
    path.trim_matches(SEPARATOR).is_empty()
}

/// Object form of `path`: leading separators stripped.
pub fn object_key(path: &str) -> &str {
    path.trim_start_matches(SEPARATOR)
}

/// Lexically clean a request path the way a file server does: collapse
/// repeated separators, drop `.` segments, resolve `..` without ever
/// climbing above the root.  The result always starts with `/` and only
/// ends with one when it is the root.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Last segment of a cleaned path (`""` for the root).
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
