//! Response cache keyed by `(region label, time period)`.
//!
//! Entries are written once per key and never invalidated; clearing the
//! cache means deleting files by hand. The file layout is
//! `<root>/<region id>/<label stem>_<period>.json` with the verbatim
//! response body as content, so cached responses can be inspected offline.
//! A merged payload that is missing sub-regions gets a sibling
//! `<label stem>_<period>.degraded.json` listing them.
//!
//! Region ids and periods are percent-encoded into path components, so
//! distinct ids never share a directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bike_risk_fetch_models::CacheKey;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::FetchError;

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Which query this answers.
    pub key: CacheKey,
    /// The raw response body (or merged payload for subdivided regions).
    pub raw_payload: String,
    /// Serialized list of sub-regions missing from `raw_payload`, if any.
    pub degraded: Option<String>,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// Get/put storage for raw responses.
///
/// Implementations must tolerate concurrent `put`s for the same key:
/// the payload for a key is content-stable, so last writer wins.
pub trait CacheStore: Send + Sync {
    /// Looks up a stored response.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the backing storage cannot be read.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, FetchError>;

    /// Stores a response, replacing any previous entry for `key`.
    ///
    /// `degraded` is stored next to the payload and handed back by
    /// [`CacheStore::get`]; `None` clears any earlier note for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the backing storage cannot be written.
    fn put(
        &self,
        key: &CacheKey,
        raw_payload: &str,
        degraded: Option<&str>,
    ) -> Result<(), FetchError>;
}

/// One JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileCache {
    /// Creates a cache rooted at `root`. Nothing is created on disk until
    /// the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the entry for `key`.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.file_for(key, "json")
    }

    /// File listing the sub-regions missing from the entry for `key`.
    #[must_use]
    pub fn degraded_path_for(&self, key: &CacheKey) -> PathBuf {
        self.file_for(key, "degraded.json")
    }

    fn file_for(&self, key: &CacheKey, extension: &str) -> PathBuf {
        self.root
            .join(encode_component(key.label.region_id()))
            .join(format!(
                "{}_{}.{extension}",
                key.label.stem(),
                encode_component(key.period.as_str())
            ))
    }
}

/// Bytes kept verbatim in path components. `.` is escaped so no component
/// can be `.` or `..` or collide with the `.degraded.json` suffix.
const PATH_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Encodes a region id or period token as a single path component.
fn encode_component(component: &str) -> String {
    if component.is_empty() {
        return "%".to_string();
    }
    utf8_percent_encode(component, PATH_COMPONENT).to_string()
}

fn read_optional(path: &Path) -> Result<Option<String>, FetchError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes beside the target and renames, so a concurrent reader never
/// sees a half-written file.
fn write_atomic(path: &Path, contents: &str) -> Result<(), FetchError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}-{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, contents)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

impl CacheStore for FileCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, FetchError> {
        let path = self.path_for(key);
        let Some(raw_payload) = read_optional(&path)? else {
            return Ok(None);
        };
        let degraded = read_optional(&self.degraded_path_for(key))?;

        let stored_at = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);

        Ok(Some(CacheEntry {
            key: key.clone(),
            raw_payload,
            degraded,
            stored_at,
        }))
    }

    fn put(
        &self,
        key: &CacheKey,
        raw_payload: &str,
        degraded: Option<&str>,
    ) -> Result<(), FetchError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        // The note goes first so a payload is never visible without it.
        let note = self.degraded_path_for(key);
        if let Some(degraded) = degraded {
            write_atomic(&note, degraded)?;
        }
        write_atomic(&path, raw_payload)?;
        if degraded.is_none() {
            match std::fs::remove_file(&note) {
                Ok(()) => log::debug!("cleared stale degraded note for {key}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        log::trace!("cached {key} at {}", path.display());
        Ok(())
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<CacheKey, CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `put` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of distinct keys stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |e| e.len())
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, FetchError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn put(
        &self,
        key: &CacheKey,
        raw_payload: &str,
        degraded: Option<&str>,
    ) -> Result<(), FetchError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                raw_payload: raw_payload.to_string(),
                degraded: degraded.map(str::to_string),
                stored_at: Utc::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn poisoned() -> FetchError {
    FetchError::Io(std::io::Error::other("memory cache lock poisoned"))
}
