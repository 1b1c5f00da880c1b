//! Region → wire parameter encoders.
//!
//! Encoders are pure: no I/O, and the only failure is a region that has
//! nothing to serialize.

use std::fmt::Write as _;
use std::sync::Arc;

use bike_risk_fetch_models::{Region, RegionError, TimePeriod};
use bike_risk_geometry::{bounds, simplify};

use crate::FetchError;
use crate::profile::QueryConfig;

/// HTTP method a query is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Parameters go in the URL query string.
    Get,
    /// Parameters go in a form-encoded body.
    Post,
}

/// Wire parameters for one request, independent of which endpoint in the
/// ranked list ends up serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedQuery {
    /// How the parameters are sent.
    pub method: HttpMethod,
    /// Name/value pairs.
    pub params: Vec<(String, String)>,
}

impl EncodedQuery {
    /// Looks up a parameter value by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Turns a `(region, period)` pair into the parameters an endpoint expects.
pub trait QueryEncoder: Send + Sync {
    /// Encodes one query.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRegion`] if the region has no vertices.
    fn encode(&self, region: &Region, period: &TimePeriod) -> Result<EncodedQuery, FetchError>;
}

/// Builds the encoder described by a profile's `[query]` section.
#[must_use]
pub fn encoder_for(config: &QueryConfig) -> Arc<dyn QueryEncoder> {
    match config {
        QueryConfig::PolicePoly { max_vertices } => Arc::new(PolicePolyEncoder {
            max_vertices: *max_vertices,
        }),
        QueryConfig::OverpassBbox {
            amenity,
            server_timeout_secs,
        } => Arc::new(OverpassBboxEncoder {
            amenity: amenity.clone(),
            server_timeout_secs: *server_timeout_secs,
        }),
    }
}

/// `data.police.uk` custom-area encoder.
///
/// Simplifies the ring to `max_vertices` and sends it as
/// `poly=lat,lng:lat,lng:...` alongside `date=<period>`.
#[derive(Debug, Clone)]
pub struct PolicePolyEncoder {
    /// Vertex budget for the serialized polygon.
    pub max_vertices: usize,
}

impl QueryEncoder for PolicePolyEncoder {
    fn encode(&self, region: &Region, period: &TimePeriod) -> Result<EncodedQuery, FetchError> {
        let simplified = simplify(region, self.max_vertices);
        let ring = simplified.ring();
        if ring.is_empty() {
            return Err(RegionError::Empty.into());
        }

        Ok(EncodedQuery {
            method: HttpMethod::Get,
            params: vec![
                ("poly".to_string(), poly_param(&ring)),
                ("date".to_string(), period.as_str().to_string()),
            ],
        })
    }
}

/// Serializes a `(lng, lat)` ring as `lat,lng:lat,lng:...`.
///
/// Geometry is stored longitude-first but the Police API wants latitude
/// first, so every pair is swapped here.
#[must_use]
pub fn poly_param(ring: &[(f64, f64)]) -> String {
    ring.iter()
        .map(|(lng, lat)| format!("{lat:.6},{lng:.6}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Overpass API encoder selecting nodes and ways with one `amenity` tag
/// inside the region's bounding box.
///
/// Overpass only sees the box, so results are a superset of the region
/// and must go through the containment filter.
#[derive(Debug, Clone)]
pub struct OverpassBboxEncoder {
    /// Value of the `amenity` tag.
    pub amenity: String,
    /// Server-side timeout in seconds.
    pub server_timeout_secs: u64,
}

impl OverpassBboxEncoder {
    /// Builds the Overpass QL text for a region.
    #[must_use]
    pub fn query_text(&self, region: &Region) -> String {
        let b = bounds(region);
        let bbox = format!(
            "{:.6},{:.6},{:.6},{:.6}",
            b.south, b.west, b.north, b.east
        );

        let mut ql = format!("[out:json][timeout:{}];\n(\n", self.server_timeout_secs);
        for element in ["node", "way"] {
            let _ = writeln!(
                ql,
                "  {element}[\"amenity\"=\"{}\"]({bbox});",
                self.amenity
            );
        }
        ql.push_str(");\nout center;");
        ql
    }
}

impl QueryEncoder for OverpassBboxEncoder {
    fn encode(&self, region: &Region, _period: &TimePeriod) -> Result<EncodedQuery, FetchError> {
        if region.vertex_count() == 0 {
            return Err(RegionError::Empty.into());
        }
        Ok(EncodedQuery {
            method: HttpMethod::Post,
            params: vec![("data".to_string(), self.query_text(region))],
        })
    }
}
