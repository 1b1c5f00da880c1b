#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region, label, and query result types for the adaptive areal fetcher.
//!
//! A [`Region`] is the polygon sent to a remote areal-query API. When the
//! API rejects a region as too large, the fetcher splits it into quadrants
//! whose position in the subdivision tree is tracked by a [`RegionLabel`].
//! Each `(label, period)` pair identifies exactly one cached response.

use std::fmt;

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors raised when constructing a [`Region`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// The ring has no vertices at all.
    #[error("Region ring is empty")]
    Empty,

    /// The ring has fewer than three distinct vertices.
    #[error("Region ring needs at least 3 distinct vertices, got {count}")]
    TooFewVertices {
        /// Number of distinct vertices found.
        count: usize,
    },

    /// A coordinate is NaN or infinite.
    #[error("Region ring contains a non-finite coordinate")]
    NonFinite,
}

/// A simple polygon in geographic coordinates (longitude, latitude).
///
/// Immutable once constructed. Quadrants and clipped pieces are new
/// values, never mutations of the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    polygon: Polygon<f64>,
}

impl Region {
    /// Builds a region from an ordered ring of `(lng, lat)` pairs.
    ///
    /// The ring may or may not repeat its first vertex at the end.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the ring is empty, has fewer than three
    /// distinct vertices, or contains non-finite coordinates.
    pub fn new(ring: Vec<(f64, f64)>) -> Result<Self, RegionError> {
        let coords: Vec<Coord<f64>> = ring.into_iter().map(|(x, y)| Coord { x, y }).collect();
        Self::from_polygon(Polygon::new(LineString::new(coords), vec![]))
    }

    /// Wraps an existing polygon, dropping any interior rings.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the exterior ring is not a usable ring.
    pub fn from_polygon(polygon: Polygon<f64>) -> Result<Self, RegionError> {
        let (exterior, _interiors) = polygon.into_inner();
        let coords = exterior.0;

        if coords.is_empty() {
            return Err(RegionError::Empty);
        }
        if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(RegionError::NonFinite);
        }

        let mut distinct: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
        for c in &coords {
            if !distinct.contains(c) {
                distinct.push(*c);
            }
        }
        if distinct.len() < 3 {
            return Err(RegionError::TooFewVertices {
                count: distinct.len(),
            });
        }

        // Polygon::new closes the ring if the caller did not.
        Ok(Self {
            polygon: Polygon::new(LineString::new(coords), vec![]),
        })
    }

    /// The underlying polygon (always closed, no holes).
    #[must_use]
    pub const fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// The ring as `(lng, lat)` pairs without the duplicated closing vertex.
    #[must_use]
    pub fn ring(&self) -> Vec<(f64, f64)> {
        let coords = &self.polygon.exterior().0;
        let open = match (coords.first(), coords.last()) {
            (Some(first), Some(last)) if coords.len() > 1 && first == last => {
                &coords[..coords.len() - 1]
            }
            _ => &coords[..],
        };
        open.iter().map(|c| (c.x, c.y)).collect()
    }

    /// Number of vertices, closing vertex excluded.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.polygon.exterior().0.len().saturating_sub(1)
    }
}

/// One of the four boxes produced by bisecting a bounding box on both axes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Quadrant {
    /// North-west.
    Nw,
    /// North-east.
    Ne,
    /// South-west.
    Sw,
    /// South-east.
    Se,
}

impl Quadrant {
    /// All quadrants in query order.
    pub const ALL: [Self; 4] = [Self::Nw, Self::Ne, Self::Sw, Self::Se];
}

/// One step down the subdivision tree.
///
/// A concave region clipped against a quadrant box can fall apart into
/// several polygons; `part` tells them apart and is `None` when the clip
/// produced a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelStep {
    /// Which quadrant of the parent's bounding box.
    pub quadrant: Quadrant,
    /// Piece index when the clip produced more than one polygon.
    pub part: Option<usize>,
}

impl fmt::Display for LabelStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.part {
            Some(part) => write!(f, "{}-{part}", self.quadrant),
            None => write!(f, "{}", self.quadrant),
        }
    }
}

/// Stable path identifying a region's position in the subdivision tree.
///
/// Two labels that compare equal denote the same geometry within one run,
/// which is what makes them usable as cache keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionLabel {
    region_id: String,
    steps: Vec<LabelStep>,
}

impl RegionLabel {
    /// The label of an undivided top-level region.
    #[must_use]
    pub fn root(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            steps: Vec::new(),
        }
    }

    /// The label of a child region one level further down.
    #[must_use]
    pub fn child(&self, quadrant: Quadrant, part: Option<usize>) -> Self {
        let mut steps = self.steps.clone();
        steps.push(LabelStep { quadrant, part });
        Self {
            region_id: self.region_id.clone(),
            steps,
        }
    }

    /// Identifier of the owning top-level region.
    #[must_use]
    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    /// Steps taken from the root.
    #[must_use]
    pub fn steps(&self) -> &[LabelStep] {
        &self.steps
    }

    /// Subdivision depth (0 for the root).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// `full` for the root, otherwise the steps joined by `_` (e.g. `NW_SE`).
    #[must_use]
    pub fn stem(&self) -> String {
        if self.steps.is_empty() {
            return "full".to_string();
        }
        self.steps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for RegionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region_id, self.stem())
    }
}

/// Opaque time-period token (e.g. `"2025-01"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePeriod(String);

impl TimePeriod {
    /// Wraps a period token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache identity of one query: `(region label, time period)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Position in the subdivision tree.
    pub label: RegionLabel,
    /// Time period the response covers.
    pub period: TimePeriod,
}

impl CacheKey {
    /// Builds a key.
    #[must_use]
    pub const fn new(label: RegionLabel, period: TimePeriod) -> Self {
        Self { label, period }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.label, self.period)
    }
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude.
    pub longitude: f64,
    /// Latitude.
    pub latitude: f64,
}

/// A single feature returned by a remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Deterministic key used to recognise the same feature across
    /// overlapping sub-queries.
    pub identity_key: String,
    /// Representative point, if the payload carries one.
    pub point: Option<GeoPoint>,
    /// The raw feature payload, untouched.
    pub payload: serde_json::Value,
}

/// Which shape of result an endpoint produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ResultShape {
    /// A bare number.
    Count,
    /// A list of identifiable features.
    Features,
}

/// The decoded answer for one `(region, period)` query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// An aggregate count with no surviving per-feature identity.
    Count(u64),
    /// Individually identifiable features.
    Features(Vec<FeatureRecord>),
}

impl QueryResult {
    /// An empty result of the given shape.
    #[must_use]
    pub const fn empty(shape: ResultShape) -> Self {
        match shape {
            ResultShape::Count => Self::Count(0),
            ResultShape::Features => Self::Features(Vec::new()),
        }
    }

    /// The shape of this result.
    #[must_use]
    pub const fn shape(&self) -> ResultShape {
        match self {
            Self::Count(_) => ResultShape::Count,
            Self::Features(_) => ResultShape::Features,
        }
    }

    /// Number of features represented by this result.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Count(n) => *n,
            Self::Features(features) => features.len() as u64,
        }
    }

    /// Whether the result holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_rejects_empty_ring() {
        assert_eq!(Region::new(vec![]), Err(RegionError::Empty));
    }

    #[test]
    fn region_rejects_degenerate_ring() {
        let err = Region::new(vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).unwrap_err();
        assert_eq!(err, RegionError::TooFewVertices { count: 2 });
    }

    #[test]
    fn region_rejects_nan() {
        let err = Region::new(vec![(0.0, 0.0), (f64::NAN, 1.0), (1.0, 0.0)]).unwrap_err();
        assert_eq!(err, RegionError::NonFinite);
    }

    #[test]
    fn ring_drops_closing_vertex() {
        let region = Region::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).unwrap();
        assert_eq!(region.ring(), vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        assert_eq!(region.vertex_count(), 3);
    }

    #[test]
    fn open_ring_is_closed_on_construction() {
        let region = Region::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]).unwrap();
        assert_eq!(region.vertex_count(), 4);
        assert_eq!(region.ring().len(), 4);
    }

    #[test]
    fn label_paths_render_like_cache_stems() {
        let root = RegionLabel::root("Camden");
        assert_eq!(root.stem(), "full");
        assert_eq!(root.depth(), 0);

        let grandchild = root.child(Quadrant::Nw, None).child(Quadrant::Se, Some(1));
        assert_eq!(grandchild.stem(), "NW_SE-1");
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.to_string(), "Camden/NW_SE-1");
        assert_eq!(grandchild.region_id(), "Camden");
    }

    #[test]
    fn quadrant_parses_from_uppercase() {
        assert_eq!("NE".parse::<Quadrant>().unwrap(), Quadrant::Ne);
        assert_eq!(Quadrant::Sw.as_ref(), "SW");
    }

    #[test]
    fn label_serializes_with_uppercase_quadrants() {
        let label = RegionLabel::root("Camden").child(Quadrant::Ne, Some(2));
        let json = serde_json::to_value(&label).unwrap();
        assert_eq!(json["steps"][0]["quadrant"], "NE");
        assert_eq!(json["steps"][0]["part"], 2);
        assert_eq!(serde_json::from_value::<RegionLabel>(json).unwrap(), label);
    }

    #[test]
    fn empty_results_match_shape() {
        assert_eq!(QueryResult::empty(ResultShape::Count), QueryResult::Count(0));
        assert!(QueryResult::empty(ResultShape::Features).is_empty());
        assert_eq!(
            QueryResult::empty(ResultShape::Features).shape(),
            ResultShape::Features
        );
    }
}
