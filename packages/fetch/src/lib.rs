#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Adaptive-subdivision fetch engine for areal-query APIs.
//!
//! Remote APIs such as `data.police.uk` cap how large a query polygon may
//! be and reject oversized regions. The [`fetcher::AdaptiveFetcher`]
//! answers a `(region, period)` query by:
//!
//! 1. returning the cached response when one exists ([`cache`]),
//! 2. otherwise encoding the region ([`encoder`]) and calling the ranked
//!    endpoint list ([`endpoint`]),
//! 3. splitting the region into quadrants when the API reports the area
//!    is too large, recursing to a bounded depth, and merging the pieces
//!    with identity-based deduplication ([`dedup`]).
//!
//! Endpoint behaviour is described by TOML profiles embedded at compile
//! time ([`profile`]).

pub mod cache;
pub mod codec;
pub mod dedup;
pub mod encoder;
pub mod endpoint;
pub mod fetcher;
pub mod paths;
pub mod police;
pub mod profile;
pub mod progress;
pub mod sweep;

#[cfg(test)]
pub(crate) mod test_support;

use bike_risk_fetch_models::{RegionError, ResultShape};

/// Errors that can occur while fetching areal statistics.
///
/// Network and endpoint failures are not errors at this level: the
/// fetcher absorbs them into empty, degraded results. What remains are
/// caller mistakes and local I/O or configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP client construction or request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (cache file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile TOML could not be parsed.
    #[error("Profile parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The region cannot be queried.
    #[error("Invalid region: {0}")]
    InvalidRegion(#[from] RegionError),

    /// Two results of different shapes were merged.
    #[error("Cannot merge a {found} result into a {expected} result")]
    ShapeMismatch {
        /// Shape of the accumulator.
        expected: ResultShape,
        /// Shape of the incoming result.
        found: ResultShape,
    },

    /// A response payload did not have the expected structure.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },

    /// A profile is structurally valid TOML but semantically unusable.
    #[error("Invalid profile: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}
