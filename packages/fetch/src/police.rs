//! `data.police.uk` helpers: which months exist, and the per-incident
//! fields kept in sweep output.
//!
//! Police data is published monthly with a lag of roughly two months. The
//! `crimes-street-dates` endpoint lists the months currently available.

use bike_risk_fetch_models::{FeatureRecord, TimePeriod};
use chrono::{Datelike as _, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::FetchError;
use crate::codec::police_point;
use crate::profile::PeriodsConfig;

/// Months the Police API is assumed to lag behind today.
pub const PUBLICATION_LAG_MONTHS: u32 = 2;

#[derive(Debug, Deserialize)]
struct DateEntry {
    date: String,
}

/// Fetches the list of available months, sorted oldest first.
///
/// # Errors
///
/// Returns [`FetchError`] if the request fails, the server answers with
/// a non-success status, or the body is not the expected JSON.
pub async fn available_months(
    client: &reqwest::Client,
    dates_url: &str,
) -> Result<Vec<TimePeriod>, FetchError> {
    let body = client
        .get(dates_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let entries: Vec<DateEntry> = serde_json::from_str(&body)?;

    let mut months: Vec<TimePeriod> = entries
        .into_iter()
        .map(|e| TimePeriod::new(e.date))
        .collect();
    months.sort();
    months.dedup();

    if let (Some(first), Some(last)) = (months.first(), months.last()) {
        log::info!("Available months: {first} … {last} ({} total)", months.len());
    }
    Ok(months)
}

/// The latest `n` entries of an ascending list.
#[must_use]
pub fn latest_months(months: &[TimePeriod], n: usize) -> Vec<TimePeriod> {
    months[months.len().saturating_sub(n)..].to_vec()
}

/// `n` consecutive `YYYY-MM` months, oldest first, ending
/// [`PUBLICATION_LAG_MONTHS`] before the month containing `today`.
#[must_use]
pub fn fallback_months(today: NaiveDate, n: usize) -> Vec<TimePeriod> {
    let first_of_month = today.with_day(1).unwrap_or(today);
    let Some(latest) = first_of_month.checked_sub_months(Months::new(PUBLICATION_LAG_MONTHS))
    else {
        return Vec::new();
    };

    let mut months: Vec<TimePeriod> = (0..n)
        .filter_map(|i| u32::try_from(i).ok())
        .filter_map(|i| latest.checked_sub_months(Months::new(i)))
        .map(|d| TimePeriod::new(d.format("%Y-%m").to_string()))
        .collect();
    months.reverse();
    months
}

/// Resolves the periods to sweep for a profile.
///
/// A fixed token wins. Otherwise the dates endpoint is asked for the
/// latest `n` months, with [`fallback_months`] used when it is
/// unreachable or returns nothing. Profiles with neither setting fall
/// back directly.
pub async fn resolve_periods(
    client: &reqwest::Client,
    config: &PeriodsConfig,
    n: usize,
    today: NaiveDate,
) -> Vec<TimePeriod> {
    if let Some(fixed) = &config.fixed {
        return vec![TimePeriod::new(fixed.clone())];
    }

    if let Some(url) = &config.dates_url {
        match available_months(client, url).await {
            Ok(months) if !months.is_empty() => {
                let selected = latest_months(&months, n);
                log::info!("Selected {} month(s)", selected.len());
                return selected;
            }
            Ok(_) => log::warn!("{url} listed no months, generating fallback list"),
            Err(e) => log::warn!("Could not fetch available months ({e}), generating fallback list"),
        }
    }

    let months = fallback_months(today, n);
    if let (Some(first), Some(last)) = (months.first(), months.last()) {
        log::warn!("Fallback months: {first} … {last}");
    }
    months
}

/// The fields of a Police crime kept in sweep output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentRecord {
    /// Police crime id, when the record has one.
    pub crime_id: Option<String>,
    /// Month the incident was reported in.
    pub month: String,
    /// Latitude of the anonymised location.
    pub lat: Option<f64>,
    /// Longitude of the anonymised location.
    pub lng: Option<f64>,
}

/// Extracts [`IncidentRecord`]s from decoded Police features.
///
/// Records without a `month` field are attributed to `period`.
#[must_use]
pub fn incident_records(features: &[FeatureRecord], period: &TimePeriod) -> Vec<IncidentRecord> {
    features
        .iter()
        .map(|f| {
            let crime = &f.payload;
            let point = f.point.or_else(|| police_point(crime));
            IncidentRecord {
                crime_id: crime.get("id").and_then(|id| match id {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                month: crime
                    .get("month")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_else(|| period.as_str())
                    .to_string(),
                lat: point.map(|p| p.latitude),
                lng: point.map(|p| p.longitude),
            }
        })
        .collect()
}
