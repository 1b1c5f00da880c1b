//! Canonical file paths for the `data/` directory.
//!
//! All paths are relative to the workspace root's `data/` directory.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/cache/` directory holding raw API responses.
#[must_use]
pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

/// Returns the cache namespace for one endpoint profile.
#[must_use]
pub fn profile_cache_dir(cache_root: &Path, profile_id: &str) -> PathBuf {
    cache_root.join(profile_id)
}

/// Returns the `data/output/` directory for sweep results.
#[must_use]
pub fn output_dir() -> PathBuf {
    data_dir().join("output")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_lives_under_data() {
        assert!(cache_dir().starts_with(data_dir()));
        assert_eq!(
            profile_cache_dir(Path::new("/tmp/cache"), "police_bicycle_theft"),
            PathBuf::from("/tmp/cache/police_bicycle_theft")
        );
    }
}
