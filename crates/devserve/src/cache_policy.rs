//! Per-extension cache durations and the fixed no-cache header set

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// `Cache-Control` value sent with every successful file response
pub const CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate, max-age=0";
/// `Pragma` value sent with every successful file response
pub const PRAGMA: &str = "no-cache";
/// `Expires` value sent with every successful file response
pub const EXPIRES: &str = "0";

/// Headers attached to every successful file response
///
/// Names are lowercase so they can be used as static header names.
pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("cache-control", CACHE_CONTROL),
    ("pragma", PRAGMA),
    ("expires", EXPIRES),
];

/// Extensions known to the default table. Every duration is zero.
pub(crate) const DEFAULT_EXTENSIONS: &[&str] = &[
    ".html", ".js", ".css", ".wasm", ".json", // app bundle
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", // images
    ".woff", ".woff2", ".ttf", ".eot", ".otf", // fonts
];

/// Mapping from lowercased extension (with leading dot) to cache duration in seconds
///
/// The table is built once at startup and only read afterwards. Durations are
/// logged per request and reported at startup; the headers written are always
/// [`NO_CACHE_HEADERS`] whatever the duration, so clients revalidate on every
/// load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct CachePolicy {
    durations: BTreeMap<String, u64>,
}

impl CachePolicy {
    /// Build a table from `(extension, seconds)` pairs
    ///
    /// Extensions are normalized to lowercase with a leading dot, so `"PNG"`
    /// and `".png"` name the same entry.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let durations = entries
            .into_iter()
            .map(|(ext, secs)| (normalize_extension(ext.as_ref()), secs))
            .collect();
        Self { durations }
    }

    /// Duration for an extension, `0` when unknown
    pub fn duration_for(&self, extension: &str) -> u64 {
        self.durations
            .get(&normalize_extension(extension))
            .copied()
            .unwrap_or(0)
    }

    /// Duration for a file path, based on its extension
    pub fn duration_for_path(&self, path: &Path) -> u64 {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.duration_for(e))
            .unwrap_or(0)
    }

    /// Whether any entry allows caching at all
    pub fn caching_enabled(&self) -> bool {
        self.durations.values().any(|&secs| secs > 0)
    }
}

impl From<BTreeMap<String, u64>> for CachePolicy {
    fn from(map: BTreeMap<String, u64>) -> Self {
        Self::from_entries(map)
    }
}

impl From<CachePolicy> for BTreeMap<String, u64> {
    fn from(policy: CachePolicy) -> Self {
        policy.durations
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_entries(DEFAULT_EXTENSIONS.iter().map(|ext| (*ext, 0)))
    }
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_all_zero() {
        let policy = CachePolicy::default();
        assert_eq!(policy.durations.len(), DEFAULT_EXTENSIONS.len());
        for ext in DEFAULT_EXTENSIONS {
            assert_eq!(policy.durations.get(*ext), Some(&0), "{}", ext);
        }
        assert!(!policy.caching_enabled());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let policy = CachePolicy::from_entries([(".PNG", 30), ("js", 5)]);
        assert_eq!(policy.duration_for("png"), 30);
        assert_eq!(policy.duration_for(".Png"), 30);
        assert_eq!(policy.duration_for(".js"), 5);
        assert!(policy.durations.contains_key(".js"));
    }

    #[test]
    fn test_unknown_extension_defaults_to_zero() {
        let policy = CachePolicy::from_entries([(".css", 60)]);
        assert_eq!(policy.duration_for(".mp4"), 0);
        assert_eq!(policy.duration_for_path(Path::new("movie.mp4")), 0);
        assert_eq!(policy.duration_for_path(Path::new("Makefile")), 0);
        assert_eq!(policy.duration_for_path(Path::new("site/STYLE.CSS")), 60);
    }

    #[test]
    fn test_caching_enabled_follows_durations() {
        assert!(!CachePolicy::from_entries([(".js", 0)]).caching_enabled());
        assert!(CachePolicy::from_entries([(".js", 0), (".css", 1)]).caching_enabled());
        assert!(!CachePolicy::from_entries(Vec::<(&str, u64)>::new()).caching_enabled());
    }

    #[test]
    fn test_deserialize_normalizes_keys() {
        let policy: CachePolicy = ron::from_str(r#"{".html": 0, "WASM": 10}"#).unwrap();
        assert_eq!(policy.duration_for(".wasm"), 10);
        assert_eq!(policy.durations.get(".html"), Some(&0));
        assert!(policy.caching_enabled());
    }
}
