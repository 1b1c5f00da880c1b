//! Sweeps a fetcher over every `(region, period)` cell.
//!
//! Cells run on a bounded pool of concurrent fetches. Each cell is
//! best-effort: a cell that fails outright is reported with its error and
//! the sweep carries on.

use std::sync::Arc;

use bike_risk_fetch_models::{Region, TimePeriod};
use futures::StreamExt as _;

use crate::FetchError;
use crate::fetcher::{AdaptiveFetcher, Fetched};
use crate::progress::ProgressCallback;

/// A top-level region with its display name.
#[derive(Debug, Clone)]
pub struct NamedRegion {
    /// Stable identifier, also used as the cache directory name.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Boundary polygon.
    pub region: Region,
}

/// Outcome of one `(region, period)` cell.
#[derive(Debug)]
pub struct CellResult {
    /// Id of the region.
    pub region_id: String,
    /// Name of the region.
    pub region_name: String,
    /// Period fetched.
    pub period: TimePeriod,
    /// The fetched result, or why the cell could not be fetched at all.
    pub outcome: Result<Fetched, FetchError>,
}

impl CellResult {
    /// Whether the cell is missing some or all of its data.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self
            .outcome
            .as_ref()
            .is_ok_and(|fetched| !fetched.is_degraded())
    }
}

/// Fetches every region for every period, at most `jobs` cells at a time.
///
/// Results come back region-major (all periods of the first region, then
/// the next), regardless of completion order.
pub async fn sweep(
    fetcher: &AdaptiveFetcher,
    regions: &[NamedRegion],
    periods: &[TimePeriod],
    jobs: usize,
    progress: Arc<dyn ProgressCallback>,
) -> Vec<CellResult> {
    let cells: Vec<(&NamedRegion, &TimePeriod)> = regions
        .iter()
        .flat_map(|r| periods.iter().map(move |p| (r, p)))
        .collect();
    progress.set_total(cells.len() as u64);
    log::info!(
        "Sweeping {} region(s) × {} period(s) with {} worker(s)",
        regions.len(),
        periods.len(),
        jobs.max(1)
    );

    let mut results: Vec<(usize, CellResult)> = futures::stream::iter(cells.into_iter().enumerate())
        .map(|(index, (named, period))| {
            let progress = progress.clone();
            async move {
                progress.set_message(format!("{} {period}", named.name));
                let outcome = fetcher.fetch_region(&named.id, &named.region, period).await;
                match &outcome {
                    Ok(fetched) => log::debug!(
                        "{} @ {period}: {} fetched record(s){}",
                        named.name,
                        fetched.result.count(),
                        if fetched.is_degraded() { " (degraded)" } else { "" }
                    ),
                    Err(e) => log::error!("{} @ {period}: {e}", named.name),
                }
                progress.inc(1);
                (
                    index,
                    CellResult {
                        region_id: named.id.clone(),
                        region_name: named.name.clone(),
                        period: period.clone(),
                        outcome,
                    },
                )
            }
        })
        .buffer_unordered(jobs.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    let degraded = results.iter().filter(|(_, c)| c.is_degraded()).count();
    progress.finish(format!(
        "{} cell(s) fetched, {degraded} degraded",
        results.len()
    ));
    results.into_iter().map(|(_, cell)| cell).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::codec::PoliceCrimesCodec;
    use crate::encoder::PolicePolyEncoder;
    use crate::endpoint::CallOutcome;
    use crate::progress::null_progress;
    use crate::test_support::{ScriptedClient, poly_bounds, police_crimes};

    fn square(west: f64, south: f64) -> Region {
        Region::new(vec![
            (west, south),
            (west + 0.1, south),
            (west + 0.1, south + 0.1),
            (west, south + 0.1),
        ])
        .unwrap()
    }

    fn regions() -> Vec<NamedRegion> {
        vec![
            NamedRegion {
                id: "E09000007".to_string(),
                name: "Camden".to_string(),
                region: square(-0.2, 51.5),
            },
            NamedRegion {
                id: "E09000012".to_string(),
                name: "Hackney".to_string(),
                region: square(-0.1, 51.5),
            },
        ]
    }

    /// Camden has one crime per month, Hackney's endpoint is down.
    fn fetcher(client: Arc<ScriptedClient>) -> AdaptiveFetcher {
        AdaptiveFetcher::new(
            2,
            Arc::new(PolicePolyEncoder { max_vertices: 25 }),
            Arc::new(PoliceCrimesCodec),
            client,
            Arc::new(MemoryCache::new()),
        )
    }

    fn scripted() -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient::new(|query| {
            let (west, ..) = poly_bounds(query);
            let month = query.param("date").unwrap_or_default().to_string();
            if west < -0.15 {
                CallOutcome::Success(police_crimes(&[1], &month))
            } else {
                CallOutcome::OtherFailure("HTTP 502".to_string())
            }
        }))
    }

    #[derive(Default)]
    struct Recorder {
        total: Mutex<u64>,
        done: Mutex<u64>,
    }

    impl ProgressCallback for Recorder {
        fn set_total(&self, total: u64) {
            *self.total.lock().unwrap() = total;
        }
        fn inc(&self, delta: u64) {
            *self.done.lock().unwrap() += delta;
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
    }

    #[tokio::test]
    async fn every_cell_gets_a_result_in_order() {
        let client = scripted();
        let fetcher = fetcher(client.clone());
        let periods = [TimePeriod::new("2025-01"), TimePeriod::new("2025-02")];

        let cells = sweep(&fetcher, &regions(), &periods, 3, null_progress()).await;

        let order: Vec<_> = cells
            .iter()
            .map(|c| (c.region_name.as_str(), c.period.as_str()))
            .collect();
        assert_eq!(
            order,
            [
                ("Camden", "2025-01"),
                ("Camden", "2025-02"),
                ("Hackney", "2025-01"),
                ("Hackney", "2025-02"),
            ]
        );
        assert_eq!(client.calls(), 4);

        assert!(!cells[0].is_degraded());
        assert_eq!(cells[0].outcome.as_ref().unwrap().result.count(), 1);
        assert!(cells[2].is_degraded());
        assert!(cells[2].outcome.as_ref().unwrap().result.is_empty());
    }

    #[tokio::test]
    async fn progress_counts_every_cell() {
        let recorder = Arc::new(Recorder::default());
        let fetcher = fetcher(scripted());
        let periods = [TimePeriod::new("2025-01")];

        sweep(&fetcher, &regions(), &periods, 1, recorder.clone()).await;

        assert_eq!(*recorder.total.lock().unwrap(), 2);
        assert_eq!(*recorder.done.lock().unwrap(), 2);
    }
}
