//! Identity-based merging of sibling sub-region results.
//!
//! Quadrant boxes share edges, so a feature sitting on a partition
//! boundary can come back from more than one sub-query. Feature lists are
//! merged by identity key with the first occurrence kept. Counts carry no
//! identity and are summed, which overcounts boundary features; endpoints
//! where that matters should use a feature-list codec.

use std::collections::BTreeSet;

use bike_risk_fetch_models::{FeatureRecord, QueryResult, ResultShape};
use serde_json::Value;

use crate::FetchError;

/// Accumulates results of one shape, dropping repeated identities.
#[derive(Debug)]
pub struct Deduplicator {
    shape: ResultShape,
    count: u64,
    features: Vec<FeatureRecord>,
    seen: BTreeSet<String>,
}

impl Deduplicator {
    /// Starts an empty accumulator for results of `shape`.
    #[must_use]
    pub const fn new(shape: ResultShape) -> Self {
        Self {
            shape,
            count: 0,
            features: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Folds one result into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ShapeMismatch`] if `result` has a different
    /// shape from the accumulator.
    pub fn push(&mut self, result: QueryResult) -> Result<(), FetchError> {
        match (self.shape, result) {
            (ResultShape::Count, QueryResult::Count(n)) => {
                self.count += n;
            }
            (ResultShape::Features, QueryResult::Features(features)) => {
                for feature in features {
                    if self.seen.insert(feature.identity_key.clone()) {
                        self.features.push(feature);
                    }
                }
            }
            (expected, other) => {
                return Err(FetchError::ShapeMismatch {
                    expected,
                    found: other.shape(),
                });
            }
        }
        Ok(())
    }

    /// Number of unique features (or the summed count) so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self.shape {
            ResultShape::Count => self.count,
            ResultShape::Features => self.features.len() as u64,
        }
    }

    /// Whether nothing has been accumulated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The merged result.
    #[must_use]
    pub fn finish(self) -> QueryResult {
        match self.shape {
            ResultShape::Count => QueryResult::Count(self.count),
            ResultShape::Features => QueryResult::Features(self.features),
        }
    }
}

/// Merges two results of the same shape.
///
/// Feature lists are unioned by identity key (first seen wins, order of
/// first appearance kept); counts are added.
///
/// # Errors
///
/// Returns [`FetchError::ShapeMismatch`] if the shapes differ.
pub fn merge(a: QueryResult, b: QueryResult) -> Result<QueryResult, FetchError> {
    let mut dedup = Deduplicator::new(a.shape());
    dedup.push(a)?;
    dedup.push(b)?;
    Ok(dedup.finish())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity key for a `data.police.uk` crime record.
///
/// Uses the crime `id`, falling back to the location's street id, and
/// finally to a composite of category and coordinates; the record month
/// is always appended. The street-id and composite fallbacks can collapse
/// two distinct incidents into one key.
#[must_use]
pub fn police_identity_key(crime: &Value) -> String {
    let month = crime.get("month").and_then(Value::as_str).unwrap_or("");

    if let Some(id) = crime.get("id").and_then(scalar_text) {
        return format!("{id}|{month}");
    }

    let location = crime.get("location");
    if let Some(street_id) = location
        .and_then(|l| l.get("street"))
        .and_then(|s| s.get("id"))
        .and_then(scalar_text)
    {
        return format!("street:{street_id}|{month}");
    }

    let field = |v: Option<&Value>| v.and_then(scalar_text).unwrap_or_default();
    format!(
        "{}@{},{}|{month}",
        field(crime.get("category")),
        field(location.and_then(|l| l.get("latitude"))),
        field(location.and_then(|l| l.get("longitude"))),
    )
}

/// Identity key for an Overpass element: `<type>/<id>`, falling back to
/// the element's coordinates when no id is present.
#[must_use]
pub fn overpass_identity_key(element: &Value) -> String {
    let kind = element.get("type").and_then(Value::as_str).unwrap_or("element");

    if let Some(id) = element.get("id").and_then(scalar_text) {
        return format!("{kind}/{id}");
    }

    match crate::codec::element_point(element) {
        Some(p) => format!("{kind}@{:.7},{:.7}", p.latitude, p.longitude),
        None => format!("{kind}@{element}"),
    }
}
