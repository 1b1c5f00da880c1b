//! Compile-time registry of endpoint profiles.
//!
//! Each areal-query API is described by a TOML file under `profiles/`.
//! The registry embeds these at compile time and exposes them via
//! [`all_profiles`] and [`profile`]. A profile loaded from disk with
//! [`load_profile`] goes through the same validation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::FetchError;

/// Endpoint profile: how to encode, send, and decode one kind of query.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointProfile {
    /// Unique identifier (e.g., `"police_bicycle_theft"`). Also names the
    /// cache namespace.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// How regions are turned into wire parameters.
    pub query: QueryConfig,
    /// How response bodies are decoded.
    pub response: ResponseConfig,
    /// Where and how requests are sent.
    pub transport: TransportConfig,
    /// Subdivision limits.
    #[serde(default)]
    pub subdivision: SubdivisionConfig,
    /// Where time periods come from.
    #[serde(default)]
    pub periods: PeriodsConfig,
}

/// Query encoder configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryConfig {
    /// `poly=lat,lng:lat,lng:...` plus `date=<period>`, sent as GET.
    PolicePoly {
        /// Vertex budget for the serialized polygon.
        #[serde(default = "default_max_vertices")]
        max_vertices: usize,
    },
    /// Overpass QL bounding-box query, sent as a POST form.
    OverpassBbox {
        /// Value of the `amenity` tag to select.
        amenity: String,
        /// Server-side `[timeout:N]` in seconds.
        #[serde(default = "default_server_timeout")]
        server_timeout_secs: u64,
    },
}

/// Response codec configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseConfig {
    /// JSON array of street-level crimes.
    PoliceCrimes,
    /// Overpass `{"elements": [...]}` document.
    OverpassElements,
    /// A bare count (number, array length, or `{"count": n}`).
    Count,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Candidate endpoint URLs in rank order.
    pub endpoints: Vec<String>,
    /// Politeness delay applied after every attempt, in milliseconds.
    #[serde(default)]
    pub request_delay_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// HTTP status that means "area too large". `None` disables
    /// subdivision for this API.
    pub capacity_exceeded_status: Option<u16>,
    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl TransportConfig {
    /// The politeness delay as a [`Duration`].
    #[must_use]
    pub const fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// The per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Subdivision limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SubdivisionConfig {
    /// Deepest level at which a capacity-exceeded region is still split.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SubdivisionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Where the list of time periods comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PeriodsConfig {
    /// Endpoint listing the available periods (Police `crimes-street-dates`).
    pub dates_url: Option<String>,
    /// A single fixed token for snapshot datasets.
    pub fixed: Option<String>,
}

const fn default_max_vertices() -> usize {
    25
}

const fn default_server_timeout() -> u64 {
    60
}

const fn default_timeout() -> u64 {
    60
}

const fn default_max_depth() -> usize {
    2
}

fn default_user_agent() -> String {
    format!("bike-risk/{} (areal statistics)", env!("CARGO_PKG_VERSION"))
}

impl EndpointProfile {
    /// Parses and validates a profile from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the TOML is malformed or the profile
    /// fails [`EndpointProfile::validate`].
    pub fn from_toml(text: &str) -> Result<Self, FetchError> {
        let profile: Self = toml::de::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks the invariants the fetcher relies on.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.id.is_empty() {
            return Err(config_error("profile id is empty"));
        }
        if self.transport.endpoints.is_empty() {
            return Err(config_error(format!(
                "profile {} lists no endpoints",
                self.id
            )));
        }
        if let QueryConfig::PolicePoly { max_vertices } = self.query
            && max_vertices < 3
        {
            return Err(config_error(format!(
                "profile {} has max_vertices = {max_vertices}; a polygon needs at least 3",
                self.id
            )));
        }
        if matches!(
            (&self.query, self.response),
            (QueryConfig::OverpassBbox { .. }, ResponseConfig::PoliceCrimes)
                | (QueryConfig::PolicePoly { .. }, ResponseConfig::OverpassElements)
        ) {
            return Err(config_error(format!(
                "profile {} pairs a query encoder with a response codec from another API",
                self.id
            )));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> FetchError {
    FetchError::Config {
        message: message.into(),
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const PROFILE_TOMLS: &[(&str, &str)] = &[
    (
        "police_bicycle_theft",
        include_str!("../profiles/police_bicycle_theft.toml"),
    ),
    (
        "osm_bicycle_parking",
        include_str!("../profiles/osm_bicycle_parking.toml"),
    ),
];

/// Identifier of the bundled Police bicycle-theft profile.
pub const POLICE_BICYCLE_THEFT: &str = "police_bicycle_theft";

/// Identifier of the bundled OSM bicycle-parking profile.
pub const OSM_BICYCLE_PARKING: &str = "osm_bicycle_parking";

/// Returns all bundled profiles.
///
/// # Panics
///
/// Panics if any bundled TOML is malformed (the files are embedded, so
/// this is caught by the test suite rather than at runtime).
#[must_use]
pub fn all_profiles() -> Vec<EndpointProfile> {
    PROFILE_TOMLS
        .iter()
        .map(|(name, text)| {
            EndpointProfile::from_toml(text)
                .unwrap_or_else(|e| panic!("Failed to parse endpoint profile '{name}': {e}"))
        })
        .collect()
}

/// Looks up a bundled profile by id.
#[must_use]
pub fn profile(id: &str) -> Option<EndpointProfile> {
    all_profiles().into_iter().find(|p| p.id == id)
}

/// Loads and validates a profile from a TOML file on disk.
///
/// # Errors
///
/// Returns [`FetchError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_profile(path: &Path) -> Result<EndpointProfile, FetchError> {
    let text = std::fs::read_to_string(path)?;
    let profile = EndpointProfile::from_toml(&text)?;
    log::info!("Loaded endpoint profile {} from {}", profile.id, path.display());
    Ok(profile)
}
