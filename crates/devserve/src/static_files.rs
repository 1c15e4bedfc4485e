//! Static file serving with MIME type detection
//!
//! Request paths are mapped beneath the root, directories fall back to their
//! index file, and successful responses always carry the no-cache header set.
//! There is deliberately no conditional request handling: no `ETag` is ever
//! produced and `If-None-Match` / `If-Modified-Since` are ignored, so every
//! hit is a full `200`.

use crate::cache_policy::{CachePolicy, NO_CACHE_HEADERS};
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED,
};
use hyper::{Response, StatusCode};
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

/// Response type used throughout the server
pub type FileBody = Full<Bytes>;

/// A request path resolved to a regular file
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    /// File on disk
    pub path: PathBuf,
    /// Size from metadata
    pub size: u64,
    /// Modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

/// Result of resolving a request path
#[derive(Debug)]
pub enum Resolution {
    /// A regular file to serve
    Found(ResolvedFile),
    /// Missing, not a regular file, or a directory without an index file
    NotFound,
}

/// Turn a URL path into a relative filesystem path
///
/// Returns the relative path and whether the URL ended in `/`. Empty, `.` and
/// `..` segments are dropped, so the result never climbs above the root.
/// Segments that are not a single plain path component (embedded backslashes
/// on windows, drive prefixes, NUL bytes) reject the whole path.
pub fn sanitize_path(request_path: &str) -> Option<(PathBuf, bool)> {
    let raw = request_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    // Escapes that are not UTF-8 become U+FFFD, so such names can only 404.
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let trailing_slash = decoded.trim_end().ends_with('/');

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        if segment.contains('\0') {
            return None;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => relative.push(part),
            _ => return None,
        }
    }
    Some((relative, trailing_slash))
}

/// Resolve a request path against `root`
pub async fn resolve(root: &Path, request_path: &str, index_file: &str) -> Resolution {
    let Some((relative, trailing_slash)) = sanitize_path(request_path) else {
        debug!(path = request_path, "rejected request path");
        return Resolution::NotFound;
    };
    let path = root.join(relative);

    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(_) => return Resolution::NotFound,
    };

    if meta.is_dir() {
        let index_path = path.join(index_file);
        return match fs::metadata(&index_path).await {
            Ok(index_meta) if index_meta.is_file() => Resolution::Found(ResolvedFile {
                path: index_path,
                size: index_meta.len(),
                modified: index_meta.modified().ok(),
            }),
            _ => Resolution::NotFound,
        };
    }

    if meta.is_file() && !trailing_slash {
        Resolution::Found(ResolvedFile {
            path,
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    } else {
        Resolution::NotFound
    }
}

/// Serve a GET (`with_body`) or HEAD request for `request_path`
pub async fn serve_file(
    root: &Path,
    request_path: &str,
    index_file: &str,
    cache: &CachePolicy,
    with_body: bool,
) -> Response<FileBody> {
    let file = match resolve(root, request_path, index_file).await {
        Resolution::Found(file) => file,
        Resolution::NotFound => return error_response(StatusCode::NOT_FOUND, "File not found"),
    };

    let (body, content_length) = if with_body {
        match fs::read(&file.path).await {
            Ok(contents) => {
                let len = contents.len() as u64;
                (Bytes::from(contents), len)
            }
            Err(e) => {
                warn!("Error reading {}: {}", file.path.display(), e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error reading file");
            }
        }
    } else {
        (Bytes::new(), file.size)
    };

    let content_type = content_type(&file.path);
    debug!(
        path = request_path,
        file = %file.path.display(),
        content_type = %content_type,
        max_age = cache.duration_for_path(&file.path),
        "serving file"
    );

    let mut response = Response::new(Full::new(body));
    let headers = response.headers_mut();
    insert_header(headers, CONTENT_TYPE, &content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    if let Some(modified) = file.modified {
        insert_header(headers, LAST_MODIFIED, &http_date(modified));
    }
    for (name, value) in NO_CACHE_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}

/// MIME type inferred from the file extension
pub fn content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Format a timestamp as an HTTP date (IMF-fixdate, always GMT)
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Create an error response
///
/// The body names only the status and `message`, never a filesystem path.
pub fn error_response(status: StatusCode, message: &str) -> Response<FileBody> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{} {}</title></head>\n\
         <body>\n<h1>{} {}</h1>\n<p>{}</p>\n<hr>\n\
         <p><em>devserve</em></p>\n</body>\n</html>",
        status.as_u16(),
        reason,
        status.as_u16(),
        reason,
        message
    );

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!("dropping invalid {} header value {:?}", name, value),
    }
}
