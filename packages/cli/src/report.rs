//! JSON report written by the `crimes` and `parking` commands.

use std::io::Write;
use std::path::Path;

use bike_risk_fetch::fetcher::DegradedCell;
use bike_risk_fetch::police::{IncidentRecord, incident_records};
use bike_risk_fetch::sweep::CellResult;
use bike_risk_fetch_models::{QueryResult, Region, TimePeriod};
use bike_risk_geometry::filter_within;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Top-level report document.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    /// Endpoint profile the cells were fetched with.
    pub profile: String,
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Periods covered, oldest first.
    pub periods: Vec<TimePeriod>,
    /// Number of cells with missing data.
    pub degraded_cells: usize,
    /// One entry per `(area, period)`.
    pub cells: Vec<CellReport>,
}

impl SweepReport {
    /// Builds a report stamped with the current time, counting the
    /// degraded cells.
    #[must_use]
    pub fn new(profile: &str, periods: Vec<TimePeriod>, cells: Vec<CellReport>) -> Self {
        Self {
            profile: profile.to_string(),
            generated_at: Utc::now(),
            periods,
            degraded_cells: cells.iter().filter(|c| c.degraded).count(),
            cells,
        }
    }
}

/// Result for one `(area, period)` cell.
#[derive(Debug, Serialize)]
pub struct CellReport {
    /// Area identifier from the boundary file.
    pub area_id: String,
    /// Area display name.
    pub area_name: String,
    /// Period the count covers.
    pub period: TimePeriod,
    /// Number of records inside the area.
    pub count: u64,
    /// `true` when some sub-region could not be fetched, so `count` is a
    /// lower bound.
    pub degraded: bool,
    /// Sub-regions that contributed nothing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_subregions: Vec<DegradedReport>,
    /// Why the cell could not be fetched at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Individual thefts, for crime cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incidents: Option<Vec<IncidentRecord>>,
}

/// A missing sub-region in report form.
#[derive(Debug, Serialize)]
pub struct DegradedReport {
    /// Sub-region label, e.g. `E09000007/NW_SE`.
    pub label: String,
    /// Why it is missing.
    pub reason: String,
}

impl From<DegradedCell> for DegradedReport {
    fn from(cell: DegradedCell) -> Self {
        Self {
            label: cell.label.to_string(),
            reason: cell.reason.to_string(),
        }
    }
}

fn skeleton(cell: &CellResult) -> CellReport {
    CellReport {
        area_id: cell.region_id.clone(),
        area_name: cell.region_name.clone(),
        period: cell.period.clone(),
        count: 0,
        degraded: true,
        degraded_subregions: Vec::new(),
        error: None,
        incidents: None,
    }
}

/// Bicycle-theft cell: count plus the incident list.
#[must_use]
pub fn crime_cell(cell: CellResult) -> CellReport {
    let mut report = skeleton(&cell);
    match cell.outcome {
        Ok(fetched) => {
            report.count = fetched.result.count();
            report.degraded = fetched.is_degraded();
            if let QueryResult::Features(features) = &fetched.result {
                report.incidents = Some(incident_records(features, &cell.period));
            }
            report.degraded_subregions = fetched.degraded.into_iter().map(Into::into).collect();
            log_cell(&report);
        }
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

/// Parking cell: features inside the area's polygon.
///
/// The Overpass query only covers the bounding box, so features are
/// filtered against `region` before counting.
#[must_use]
pub fn parking_cell(cell: CellResult, region: &Region) -> CellReport {
    let mut report = skeleton(&cell);
    match cell.outcome {
        Ok(fetched) => {
            report.degraded = fetched.is_degraded();
            report.count = match fetched.result {
                QueryResult::Features(features) => {
                    let candidates = features.len();
                    let inside = filter_within(features, region);
                    log::debug!(
                        "{}: {} of {candidates} candidate(s) inside the boundary",
                        cell.region_name,
                        inside.len()
                    );
                    inside.len() as u64
                }
                QueryResult::Count(n) => n,
            };
            report.degraded_subregions = fetched.degraded.into_iter().map(Into::into).collect();
            log_cell(&report);
        }
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

fn log_cell(report: &CellReport) {
    log::info!(
        "{} @ {}: {}{}",
        report.area_name,
        report.period,
        report.count,
        if report.degraded { " (degraded)" } else { "" }
    );
}

/// Writes the report as pretty JSON to `out`, or to stdout.
///
/// # Errors
///
/// Returns an error if the file cannot be created or serialization fails.
pub fn write_report(
    report: &SweepReport,
    out: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                bike_risk_fetch::paths::ensure_dir(parent)?;
            }
            let file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
            log::info!("Wrote {} cell(s) to {}", report.cells.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, report)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}
