//! Point-in-polygon filtering against the true (unsimplified) region.
//!
//! Some APIs only accept a bounding box and return every feature inside
//! it. Containment is always tested against the original polygon, never
//! against the box used for the wire query.

use bike_risk_fetch_models::{FeatureRecord, GeoPoint, Region};
use geo::{Contains, Point};

/// Whether `point` lies strictly inside `region` (boundary excluded).
#[must_use]
pub fn contains_point(region: &Region, point: GeoPoint) -> bool {
    region
        .polygon()
        .contains(&Point::new(point.longitude, point.latitude))
}

/// Keeps only candidates whose representative point lies strictly inside
/// `region`. Candidates without a point are dropped.
#[must_use]
pub fn filter_within(candidates: Vec<FeatureRecord>, region: &Region) -> Vec<FeatureRecord> {
    let before = candidates.len();
    let kept: Vec<FeatureRecord> = candidates
        .into_iter()
        .filter(|c| c.point.is_some_and(|p| contains_point(region, p)))
        .collect();

    log::debug!(
        "containment filter kept {} of {before} candidates",
        kept.len()
    );
    kept
}
