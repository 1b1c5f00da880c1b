//! Vertex-budget simplification.
//!
//! Remote APIs cap the number of points a query polygon may carry. The
//! ring is simplified with the topology-preserving Visvalingam-Whyatt
//! algorithm, doubling the tolerance until the budget is met.

use bike_risk_fetch_models::Region;
use geo::SimplifyVwPreserve;

/// Starting tolerance, in degrees.
pub const INITIAL_TOLERANCE: f64 = 0.0001;

/// Number of tolerance doublings tried before settling for the coarsest
/// result.
pub const MAX_ATTEMPTS: u32 = 30;

/// Reduces `region` to at most `max_vertices` vertices (closing vertex
/// excluded).
///
/// Regions already within budget are returned unchanged. Otherwise the
/// tolerance starts at [`INITIAL_TOLERANCE`] and doubles on each attempt,
/// up to [`MAX_ATTEMPTS`]; if the budget is never met the coarsest valid
/// attempt is returned. The result depends only on the input ring and
/// budget.
#[must_use]
pub fn simplify(region: &Region, max_vertices: usize) -> Region {
    if region.vertex_count() <= max_vertices {
        return region.clone();
    }

    let mut tolerance = INITIAL_TOLERANCE;
    let mut coarsest = region.clone();

    for attempt in 0..MAX_ATTEMPTS {
        // VW thresholds on triangle area, so square the linear tolerance.
        let candidate = region.polygon().simplify_vw_preserve(tolerance * tolerance);

        let Ok(candidate) = Region::from_polygon(candidate) else {
            log::debug!("simplification collapsed the ring at attempt {attempt}, stopping");
            break;
        };

        let within_budget = candidate.vertex_count() <= max_vertices;
        coarsest = candidate;
        if within_budget {
            break;
        }
        tolerance *= 2.0;
    }

    if coarsest.vertex_count() > max_vertices {
        log::warn!(
            "could not simplify ring below {max_vertices} vertices (kept {})",
            coarsest.vertex_count()
        );
    }

    coarsest
}
