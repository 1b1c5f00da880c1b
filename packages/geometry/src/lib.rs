#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry helpers for areal queries.
//!
//! Three pieces, all pure functions over [`Region`] values:
//!
//! - [`simplify`] shrinks a ring to a vertex budget before it is
//!   serialized into a query parameter.
//! - [`subdivide`] bisects a region's bounding box into quadrants and
//!   clips the region against each one.
//! - [`filter_within`] drops features whose point falls outside the true
//!   polygon, for APIs that only understand bounding boxes.
//!
//! [`Region`]: bike_risk_fetch_models::Region

mod containment;
mod simplify;
mod subdivide;

pub use containment::{contains_point, filter_within};
pub use simplify::{INITIAL_TOLERANCE, MAX_ATTEMPTS, simplify};
pub use subdivide::{Bounds, SubRegion, bounds, subdivide};
