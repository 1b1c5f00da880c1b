//! Quadrant subdivision.

use bike_risk_fetch_models::{Quadrant, Region};
use geo::{Area, BooleanOps, BoundingRect, Rect, coord};

/// Axis-aligned bounds of a region in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum longitude.
    pub west: f64,
    /// Minimum latitude.
    pub south: f64,
    /// Maximum longitude.
    pub east: f64,
    /// Maximum latitude.
    pub north: f64,
}

impl Bounds {
    /// The sub-box covering one quadrant of these bounds.
    #[must_use]
    pub fn quadrant(&self, quadrant: Quadrant) -> Self {
        let mid_x = (self.west + self.east) / 2.0;
        let mid_y = (self.south + self.north) / 2.0;
        match quadrant {
            Quadrant::Nw => Self {
                west: self.west,
                south: mid_y,
                east: mid_x,
                north: self.north,
            },
            Quadrant::Ne => Self {
                west: mid_x,
                south: mid_y,
                east: self.east,
                north: self.north,
            },
            Quadrant::Sw => Self {
                west: self.west,
                south: self.south,
                east: mid_x,
                north: mid_y,
            },
            Quadrant::Se => Self {
                west: mid_x,
                south: self.south,
                east: self.east,
                north: mid_y,
            },
        }
    }

    fn to_rect(self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }
}

/// Bounding box of a region.
#[must_use]
pub fn bounds(region: &Region) -> Bounds {
    // A validated region always has at least three vertices.
    region.polygon().bounding_rect().map_or(
        Bounds {
            west: 0.0,
            south: 0.0,
            east: 0.0,
            north: 0.0,
        },
        |rect| Bounds {
            west: rect.min().x,
            south: rect.min().y,
            east: rect.max().x,
            north: rect.max().y,
        },
    )
}

/// One non-empty piece of a region clipped to a quadrant.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRegion {
    /// The quadrant the piece came from.
    pub quadrant: Quadrant,
    /// Piece index when the clip produced several polygons.
    pub part: Option<usize>,
    /// The clipped geometry.
    pub region: Region,
}

/// Splits `region` into the pieces obtained by intersecting it with the
/// four quadrants of its bounding box, in NW, NE, SW, SE order.
///
/// Quadrants whose intersection is empty (or degenerate) are omitted. A
/// concave region may yield several pieces for one quadrant; those are
/// returned separately with a `part` index.
#[must_use]
pub fn subdivide(region: &Region) -> Vec<SubRegion> {
    let outer = bounds(region);
    let mut pieces = Vec::with_capacity(4);

    for quadrant in Quadrant::ALL {
        let cell = outer.quadrant(quadrant).to_rect().to_polygon();
        let clipped = region.polygon().intersection(&cell);

        let parts: Vec<Region> = clipped
            .into_iter()
            .filter(|polygon| polygon.unsigned_area() > 0.0)
            .filter_map(|polygon| Region::from_polygon(polygon).ok())
            .collect();

        if parts.is_empty() {
            log::trace!("quadrant {quadrant} does not intersect the region, skipping");
            continue;
        }

        let multi = parts.len() > 1;
        pieces.extend(parts.into_iter().enumerate().map(|(i, region)| SubRegion {
            quadrant,
            part: multi.then_some(i),
            region,
        }));
    }

    pieces
}
