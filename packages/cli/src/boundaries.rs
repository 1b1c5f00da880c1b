//! Loads top-level regions from a `GeoJSON` `FeatureCollection`.
//!
//! Coordinates must already be WGS84 longitude/latitude. `MultiPolygon`
//! features (boroughs with islands, say) are reduced to their largest
//! polygon, and interior rings are ignored.

use std::path::Path;

use bike_risk_fetch::sweep::NamedRegion;
use bike_risk_fetch_models::{Region, RegionError};
use geo::{Area as _, Polygon};
use geojson::{Feature, GeoJson};

/// Errors raised while loading a boundaries file.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid `GeoJSON`.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document is a bare geometry or single feature.
    #[error("Boundaries must be a GeoJSON FeatureCollection")]
    NotFeatureCollection,

    /// A feature has no usable identifier.
    #[error("Feature {index} has no '{property}' property")]
    MissingId {
        /// Position of the feature in the collection.
        index: usize,
        /// Property that was looked up.
        property: String,
    },

    /// A feature's polygon is unusable.
    #[error("Feature {id}: {source}")]
    InvalidRegion {
        /// Identifier of the offending feature.
        id: String,
        /// What is wrong with it.
        source: RegionError,
    },
}

/// Which feature properties hold the region id and display name.
#[derive(Debug, Clone)]
pub struct BoundaryProperties {
    /// Property holding the stable region id.
    pub id: String,
    /// Property holding the display name.
    pub name: String,
}

/// Reads a boundaries file.
///
/// # Errors
///
/// Returns [`BoundaryError`] if the file cannot be read or parsed, is not a
/// `FeatureCollection`, or a polygon feature lacks an id or has a
/// degenerate ring.
pub fn load_boundaries(
    path: &Path,
    properties: &BoundaryProperties,
) -> Result<Vec<NamedRegion>, BoundaryError> {
    let text = std::fs::read_to_string(path)?;
    let regions = parse_boundaries(&text, properties)?;
    log::info!("Loaded {} region(s) from {}", regions.len(), path.display());
    Ok(regions)
}

/// Parses boundaries from `GeoJSON` text. Features without a polygonal
/// geometry are skipped with a warning.
///
/// # Errors
///
/// See [`load_boundaries`].
pub fn parse_boundaries(
    text: &str,
    properties: &BoundaryProperties,
) -> Result<Vec<NamedRegion>, BoundaryError> {
    let GeoJson::FeatureCollection(collection) = text.parse::<GeoJson>()? else {
        return Err(BoundaryError::NotFeatureCollection);
    };

    let mut regions = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = property_text(&feature, &properties.id).ok_or_else(|| BoundaryError::MissingId {
            index,
            property: properties.id.clone(),
        })?;
        let name = property_text(&feature, &properties.name).unwrap_or_else(|| id.clone());

        let Some(polygon) = largest_polygon(feature) else {
            log::warn!("Skipping {id} ({name}): no polygon geometry");
            continue;
        };
        let region = Region::from_polygon(polygon).map_err(|source| BoundaryError::InvalidRegion {
            id: id.clone(),
            source,
        })?;

        regions.push(NamedRegion { id, name, region });
    }
    Ok(regions)
}

fn property_text(feature: &Feature, property: &str) -> Option<String> {
    match feature.property(property)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The feature's polygon, or the largest member of a `MultiPolygon`.
fn largest_polygon(feature: Feature) -> Option<Polygon<f64>> {
    let geometry: geo::Geometry<f64> = feature.geometry?.try_into().ok()?;
    match geometry {
        geo::Geometry::Polygon(p) => Some(p),
        geo::Geometry::MultiPolygon(mp) => mp
            .0
            .into_iter()
            .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area())),
        _ => None,
    }
}
