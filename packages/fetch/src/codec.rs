//! Raw payload ↔ [`QueryResult`] codecs.
//!
//! The cache stores raw response bodies verbatim, so every codec must be
//! able to read back what it wrote for a merged (subdivided) result.

use std::sync::Arc;

use bike_risk_fetch_models::{FeatureRecord, GeoPoint, QueryResult, ResultShape};
use serde_json::Value;

use crate::FetchError;
use crate::dedup::{overpass_identity_key, police_identity_key};
use crate::profile::ResponseConfig;

/// Decodes response bodies and re-encodes merged results.
pub trait PayloadCodec: Send + Sync {
    /// Shape of the results this codec produces.
    fn shape(&self) -> ResultShape;

    /// Decodes a raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the body is not JSON or lacks the expected
    /// structure.
    fn decode(&self, raw: &str) -> Result<QueryResult, FetchError>;

    /// Encodes a result as a payload [`PayloadCodec::decode`] accepts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ShapeMismatch`] if `result` has the wrong shape.
    fn encode(&self, result: &QueryResult) -> Result<String, FetchError>;
}

/// Builds the codec described by a profile's `[response]` section.
#[must_use]
pub fn codec_for(config: ResponseConfig) -> Arc<dyn PayloadCodec> {
    match config {
        ResponseConfig::PoliceCrimes => Arc::new(PoliceCrimesCodec),
        ResponseConfig::OverpassElements => Arc::new(OverpassElementsCodec),
        ResponseConfig::Count => Arc::new(CountCodec),
    }
}

fn decode_error(message: impl Into<String>) -> FetchError {
    FetchError::Decode {
        message: message.into(),
    }
}

fn expect_features(result: &QueryResult) -> Result<&[FeatureRecord], FetchError> {
    match result {
        QueryResult::Features(features) => Ok(features),
        QueryResult::Count(_) => Err(FetchError::ShapeMismatch {
            expected: ResultShape::Features,
            found: ResultShape::Count,
        }),
    }
}

/// `data.police.uk` street-level crimes: a JSON array of crime objects.
pub struct PoliceCrimesCodec;

impl PayloadCodec for PoliceCrimesCodec {
    fn shape(&self) -> ResultShape {
        ResultShape::Features
    }

    fn decode(&self, raw: &str) -> Result<QueryResult, FetchError> {
        let body: Value = serde_json::from_str(raw)?;
        let crimes = body
            .as_array()
            .ok_or_else(|| decode_error("Police response is not an array"))?;

        Ok(QueryResult::Features(
            crimes
                .iter()
                .map(|crime| FeatureRecord {
                    identity_key: police_identity_key(crime),
                    point: police_point(crime),
                    payload: crime.clone(),
                })
                .collect(),
        ))
    }

    fn encode(&self, result: &QueryResult) -> Result<String, FetchError> {
        let crimes: Vec<&Value> = expect_features(result)?
            .iter()
            .map(|f| &f.payload)
            .collect();
        Ok(serde_json::to_string(&crimes)?)
    }
}

/// Reads `location.latitude` / `location.longitude`, which the Police API
/// sends as decimal strings.
#[must_use]
pub fn police_point(crime: &Value) -> Option<GeoPoint> {
    let location = crime.get("location")?;
    let coordinate = |field: &str| -> Option<f64> {
        match location.get(field)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    Some(GeoPoint {
        latitude: coordinate("latitude")?,
        longitude: coordinate("longitude")?,
    })
}

/// Overpass API JSON: `{"elements": [...]}` produced by `out center;`.
pub struct OverpassElementsCodec;

impl PayloadCodec for OverpassElementsCodec {
    fn shape(&self) -> ResultShape {
        ResultShape::Features
    }

    fn decode(&self, raw: &str) -> Result<QueryResult, FetchError> {
        let body: Value = serde_json::from_str(raw)?;
        let elements = body
            .get("elements")
            .and_then(Value::as_array)
            .ok_or_else(|| decode_error("No elements array in Overpass response"))?;

        Ok(QueryResult::Features(
            elements
                .iter()
                .map(|element| FeatureRecord {
                    identity_key: overpass_identity_key(element),
                    point: element_point(element),
                    payload: element.clone(),
                })
                .collect(),
        ))
    }

    fn encode(&self, result: &QueryResult) -> Result<String, FetchError> {
        let elements: Vec<&Value> = expect_features(result)?
            .iter()
            .map(|f| &f.payload)
            .collect();
        Ok(serde_json::to_string(&serde_json::json!({ "elements": elements }))?)
    }
}

/// Representative point of an Overpass element.
///
/// Nodes carry `lat`/`lon` directly; ways carry a `center` object when
/// queried with `out center;`. Other element types have no point.
#[must_use]
pub fn element_point(element: &Value) -> Option<GeoPoint> {
    let source = match element.get("type")?.as_str()? {
        "node" => element,
        "way" => element.get("center")?,
        _ => return None,
    };
    Some(GeoPoint {
        latitude: source.get("lat")?.as_f64()?,
        longitude: source.get("lon")?.as_f64()?,
    })
}

/// Aggregate count: a bare number, an array (its length), or
/// `{"count": n}`.
pub struct CountCodec;

impl PayloadCodec for CountCodec {
    fn shape(&self) -> ResultShape {
        ResultShape::Count
    }

    fn decode(&self, raw: &str) -> Result<QueryResult, FetchError> {
        let body: Value = serde_json::from_str(raw)?;
        let n = match &body {
            Value::Number(n) => n.as_u64(),
            Value::Array(items) => Some(items.len() as u64),
            Value::Object(obj) => obj.get("count").and_then(Value::as_u64),
            _ => None,
        }
        .ok_or_else(|| decode_error(format!("Cannot read a count from {body}")))?;
        Ok(QueryResult::Count(n))
    }

    fn encode(&self, result: &QueryResult) -> Result<String, FetchError> {
        match result {
            QueryResult::Count(n) => Ok(serde_json::json!({ "count": n }).to_string()),
            QueryResult::Features(_) => Err(FetchError::ShapeMismatch {
                expected: ResultShape::Count,
                found: ResultShape::Features,
            }),
        }
    }
}
