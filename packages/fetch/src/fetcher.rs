//! The adaptive-subdivision fetcher.
//!
//! A region that the API rejects as too large is split into quadrants of
//! its bounding box (clipped back to the region), each quadrant is fetched
//! the same way, and the pieces are merged by identity key. Every response
//! and every merged parent is cached under its `(label, period)` key, so a
//! second run over the same inputs makes no network calls.
//!
//! Endpoint failures never abort a fetch. The affected sub-region
//! contributes an empty result and is reported in [`Fetched::degraded`].
//! A merged parent is cached together with its degraded list, so a later
//! cache hit reports the same gaps.

use std::fmt;
use std::sync::Arc;

use bike_risk_fetch_models::{CacheKey, QueryResult, Region, RegionLabel, TimePeriod};
use bike_risk_geometry::subdivide;
use futures::future::{BoxFuture, FutureExt as _};
use serde::{Deserialize, Serialize};

use crate::FetchError;
use crate::cache::CacheStore;
use crate::codec::{PayloadCodec, codec_for};
use crate::dedup::Deduplicator;
use crate::encoder::{QueryEncoder, encoder_for};
use crate::endpoint::{CallOutcome, EndpointClient, HttpEndpointClient};
use crate::profile::EndpointProfile;

/// Why a sub-region contributed nothing to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum DegradeReason {
    /// Every endpoint failed; carries the collected details.
    EndpointFailure(String),
    /// Still over capacity at the deepest allowed level.
    MaxDepthExceeded,
    /// The endpoint answered with a body the codec could not read.
    UndecodablePayload(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointFailure(details) => write!(f, "endpoint failure: {details}"),
            Self::MaxDepthExceeded => f.write_str("capacity exceeded at maximum depth"),
            Self::UndecodablePayload(details) => write!(f, "undecodable payload: {details}"),
        }
    }
}

/// A sub-region whose data is missing from a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedCell {
    /// Which sub-region.
    pub label: RegionLabel,
    /// What went wrong.
    pub reason: DegradeReason,
}

/// A merged result plus the sub-regions that could not be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Deduplicated result for the whole region.
    pub result: QueryResult,
    /// Sub-regions that contributed nothing. Empty when complete.
    pub degraded: Vec<DegradedCell>,
}

impl Fetched {
    const fn complete(result: QueryResult) -> Self {
        Self {
            result,
            degraded: Vec::new(),
        }
    }

    /// Whether any sub-region is missing.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Fetches `(region, period)` queries through cache, failover, and
/// bounded quadrant subdivision.
pub struct AdaptiveFetcher {
    max_depth: usize,
    encoder: Arc<dyn QueryEncoder>,
    codec: Arc<dyn PayloadCodec>,
    client: Arc<dyn EndpointClient>,
    cache: Arc<dyn CacheStore>,
}

impl AdaptiveFetcher {
    /// Assembles a fetcher from its parts.
    #[must_use]
    pub fn new(
        max_depth: usize,
        encoder: Arc<dyn QueryEncoder>,
        codec: Arc<dyn PayloadCodec>,
        client: Arc<dyn EndpointClient>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            max_depth,
            encoder,
            codec,
            client,
            cache,
        }
    }

    /// Builds a fetcher talking HTTP to the endpoints a profile lists.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the HTTP client cannot be built from the
    /// profile's transport settings.
    pub fn from_profile(
        profile: &EndpointProfile,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, FetchError> {
        let client = HttpEndpointClient::from_transport(&profile.transport)?;
        Ok(Self::new(
            profile.subdivision.max_depth,
            encoder_for(&profile.query),
            codec_for(profile.response),
            Arc::new(client),
            cache,
        ))
    }

    /// Deepest level at which a region is still split.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Fetches one top-level region for one period.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRegion`] if the region cannot be
    /// encoded, or [`FetchError`] if a merged result cannot be re-encoded.
    /// Network and endpoint problems are reported through
    /// [`Fetched::degraded`] instead.
    pub async fn fetch_region(
        &self,
        region_id: &str,
        region: &Region,
        period: &TimePeriod,
    ) -> Result<Fetched, FetchError> {
        let fetched = self
            .fetch(region, period, RegionLabel::root(region_id))
            .await?;
        if fetched.is_degraded() {
            log::warn!(
                "{region_id} @ {period}: {} sub-region(s) degraded",
                fetched.degraded.len()
            );
        }
        Ok(fetched)
    }

    fn fetch<'a>(
        &'a self,
        region: &'a Region,
        period: &'a TimePeriod,
        label: RegionLabel,
    ) -> BoxFuture<'a, Result<Fetched, FetchError>> {
        async move {
            let key = CacheKey::new(label, period.clone());

            if let Some(fetched) = self.cached(&key) {
                log::debug!(
                    "Cache hit for {key} ({} degraded sub-region(s))",
                    fetched.degraded.len()
                );
                return Ok(fetched);
            }

            let query = self.encoder.encode(region, period)?;

            match self.client.call(&query).await {
                CallOutcome::Success(raw) => match self.codec.decode(&raw) {
                    Ok(result) => {
                        log::debug!("{key}: {} result(s)", result.count());
                        self.store(&key, &raw, &[]);
                        Ok(Fetched::complete(result))
                    }
                    Err(e) => {
                        log::warn!("{key}: response could not be decoded: {e}");
                        let reason = DegradeReason::UndecodablePayload(e.to_string());
                        Ok(self.degraded(key.label, reason))
                    }
                },
                CallOutcome::OtherFailure(details) => {
                    log::warn!("{key}: all endpoints failed: {details}");
                    Ok(self.degraded(key.label, DegradeReason::EndpointFailure(details)))
                }
                CallOutcome::CapacityExceeded if key.label.depth() >= self.max_depth => {
                    log::warn!(
                        "{key}: area still too large at depth {}, giving up on this piece",
                        key.label.depth()
                    );
                    Ok(self.degraded(key.label, DegradeReason::MaxDepthExceeded))
                }
                CallOutcome::CapacityExceeded => {
                    let children = subdivide(region);
                    log::info!(
                        "{key}: area too large, splitting into {} piece(s)",
                        children.len()
                    );

                    let mut merged = Deduplicator::new(self.codec.shape());
                    let mut degraded = Vec::new();
                    for child in children {
                        let child_label = key.label.child(child.quadrant, child.part);
                        let fetched = self.fetch(&child.region, period, child_label).await?;
                        merged.push(fetched.result)?;
                        degraded.extend(fetched.degraded);
                    }

                    let result = merged.finish();
                    let payload = self.codec.encode(&result)?;
                    self.store(&key, &payload, &degraded);
                    Ok(Fetched { result, degraded })
                }
            }
        }
        .boxed()
    }

    /// Decoded cache entry, treating unreadable entries as misses.
    fn cached(&self, key: &CacheKey) -> Option<Fetched> {
        let entry = match self.cache.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                log::warn!("{key}: cache read failed, refetching: {e}");
                return None;
            }
        };
        let result = match self.codec.decode(&entry.raw_payload) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("{key}: cached payload is unreadable, refetching: {e}");
                return None;
            }
        };
        let degraded = match entry
            .degraded
            .as_deref()
            .map(serde_json::from_str::<Vec<DegradedCell>>)
        {
            None => Vec::new(),
            Some(Ok(degraded)) => degraded,
            Some(Err(e)) => {
                log::warn!("{key}: cached degraded list is unreadable, refetching: {e}");
                return None;
            }
        };
        Some(Fetched { result, degraded })
    }

    fn store(&self, key: &CacheKey, payload: &str, degraded: &[DegradedCell]) {
        let note = if degraded.is_empty() {
            None
        } else {
            match serde_json::to_string(degraded) {
                Ok(note) => Some(note),
                Err(e) => {
                    log::warn!("{key}: degraded list not serializable, skipping cache: {e}");
                    return;
                }
            }
        };
        if let Err(e) = self.cache.put(key, payload, note.as_deref()) {
            log::warn!("{key}: failed to write cache entry: {e}");
        }
    }

    fn degraded(&self, label: RegionLabel, reason: DegradeReason) -> Fetched {
        Fetched {
            result: QueryResult::empty(self.codec.shape()),
            degraded: vec![DegradedCell { label, reason }],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bike_risk_fetch_models::{Quadrant, RegionError, ResultShape};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::codec::{CountCodec, PoliceCrimesCodec};
    use crate::encoder::{EncodedQuery, PolicePolyEncoder};
    use crate::test_support::{
        ScriptedClient, hanging_server, poly_bounds, police_crimes, serve_once,
    };

    /// 2° × 2° square centred on (0, 52).
    fn big_square() -> Region {
        Region::new(vec![(-1.0, 51.0), (1.0, 51.0), (1.0, 53.0), (-1.0, 53.0)]).unwrap()
    }

    fn period() -> TimePeriod {
        TimePeriod::new("2025-01")
    }

    fn police_fetcher(
        max_depth: usize,
        client: Arc<dyn EndpointClient>,
        cache: Arc<MemoryCache>,
    ) -> AdaptiveFetcher {
        AdaptiveFetcher::new(
            max_depth,
            Arc::new(PolicePolyEncoder { max_vertices: 25 }),
            Arc::new(PoliceCrimesCodec),
            client,
            cache,
        )
    }

    fn quadrant_of(query: &EncodedQuery) -> Option<Quadrant> {
        let (west, south, east, north) = poly_bounds(query);
        if east - west > 1.5 || north - south > 1.5 {
            return None;
        }
        let (cx, cy) = (f64::midpoint(west, east), f64::midpoint(south, north));
        Some(match (cx < 0.0, cy > 52.0) {
            (true, true) => Quadrant::Nw,
            (false, true) => Quadrant::Ne,
            (true, false) => Quadrant::Sw,
            (false, false) => Quadrant::Se,
        })
    }

    /// Root is too large; quadrants hold 3, 0, 5 and 2 disjoint crimes.
    fn three_zero_five_two() -> ScriptedClient {
        ScriptedClient::new(|query| match quadrant_of(query) {
            None => CallOutcome::CapacityExceeded,
            Some(Quadrant::Nw) => CallOutcome::Success(police_crimes(&[1, 2, 3], "2025-01")),
            Some(Quadrant::Ne) => CallOutcome::Success(police_crimes(&[], "2025-01")),
            Some(Quadrant::Sw) => {
                CallOutcome::Success(police_crimes(&[10, 11, 12, 13, 14], "2025-01"))
            }
            Some(Quadrant::Se) => CallOutcome::Success(police_crimes(&[20, 21], "2025-01")),
        })
    }

    #[tokio::test]
    async fn oversized_region_is_split_and_merged() {
        let client = Arc::new(three_zero_five_two());
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client.clone(), cache.clone());

        let fetched = fetcher
            .fetch_region("Camden", &big_square(), &period())
            .await
            .unwrap();

        assert_eq!(fetched.result.count(), 10);
        assert!(!fetched.is_degraded());
        assert_eq!(client.calls(), 5);
        // Four quadrant responses plus the merged root.
        assert_eq!(cache.writes(), 5);

        let root_key = CacheKey::new(RegionLabel::root("Camden"), period());
        let root_entry = cache.get(&root_key).unwrap().unwrap();
        assert_eq!(
            PoliceCrimesCodec.decode(&root_entry.raw_payload).unwrap(),
            fetched.result
        );
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let client = Arc::new(three_zero_five_two());
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client.clone(), cache.clone());

        let first = fetcher
            .fetch_region("Camden", &big_square(), &period())
            .await
            .unwrap();
        let calls = client.calls();
        let writes = cache.writes();

        let second = fetcher
            .fetch_region("Camden", &big_square(), &period())
            .await
            .unwrap();

        assert_eq!(client.calls(), calls);
        assert_eq!(cache.writes(), writes);
        assert_eq!(first.result, second.result);
    }

    #[tokio::test]
    async fn subdivision_stops_at_max_depth() {
        let client = Arc::new(ScriptedClient::new(|_| CallOutcome::CapacityExceeded));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client.clone(), cache.clone());

        let fetched = fetcher
            .fetch_region("Westminster", &big_square(), &period())
            .await
            .unwrap();

        assert!(fetched.result.is_empty());
        // 1 root + 4 children + 16 grandchildren.
        assert_eq!(client.calls(), 21);
        assert_eq!(fetched.degraded.len(), 16);
        assert!(fetched.degraded.iter().all(|cell| {
            cell.reason == DegradeReason::MaxDepthExceeded && cell.label.depth() == 2
        }));
    }

    #[tokio::test]
    async fn degraded_parent_stays_degraded_when_served_from_cache() {
        let client = Arc::new(ScriptedClient::new(|_| CallOutcome::CapacityExceeded));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(1, client.clone(), cache.clone());

        let first = fetcher
            .fetch_region("Barnet", &big_square(), &period())
            .await
            .unwrap();
        assert_eq!(first.degraded.len(), 4);
        assert_eq!(client.calls(), 5);

        let second = fetcher
            .fetch_region("Barnet", &big_square(), &period())
            .await
            .unwrap();
        assert_eq!(client.calls(), 5);
        assert!(second.is_degraded());
        assert_eq!(second.degraded, first.degraded);
        assert_eq!(second.result, first.result);
    }

    #[tokio::test]
    async fn unreadable_degraded_list_is_refetched() {
        let client = Arc::new(ScriptedClient::new(|_| {
            CallOutcome::Success(police_crimes(&[5], "2025-01"))
        }));
        let cache = Arc::new(MemoryCache::new());
        let key = CacheKey::new(RegionLabel::root("Ealing"), period());
        cache
            .put(&key, &police_crimes(&[5], "2025-01"), Some("not a list"))
            .unwrap();

        let fetcher = police_fetcher(2, client.clone(), cache.clone());
        let fetched = fetcher
            .fetch_region("Ealing", &big_square(), &period())
            .await
            .unwrap();

        assert!(!fetched.is_degraded());
        assert_eq!(client.calls(), 1);
        assert!(cache.get(&key).unwrap().unwrap().degraded.is_none());
    }

    #[tokio::test]
    async fn endpoint_failure_yields_empty_degraded_result() {
        let client = Arc::new(ScriptedClient::new(|_| {
            CallOutcome::OtherFailure("HTTP 500".to_string())
        }));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client.clone(), cache.clone());

        let fetched = fetcher
            .fetch_region("Hackney", &big_square(), &period())
            .await
            .unwrap();

        assert!(fetched.result.is_empty());
        assert_eq!(
            fetched.degraded,
            vec![DegradedCell {
                label: RegionLabel::root("Hackney"),
                reason: DegradeReason::EndpointFailure("HTTP 500".to_string()),
            }]
        );
        assert_eq!(cache.writes(), 0);

        // Failures are not cached, so the next run tries again.
        fetcher
            .fetch_region("Hackney", &big_square(), &period())
            .await
            .unwrap();
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn sibling_failure_does_not_abort_the_others() {
        let client = Arc::new(ScriptedClient::new(|query| match quadrant_of(query) {
            None => CallOutcome::CapacityExceeded,
            Some(Quadrant::Ne) => CallOutcome::OtherFailure("timeout".to_string()),
            Some(_) => CallOutcome::Success(police_crimes(&[7], "2025-01")),
        }));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client, cache);

        let fetched = fetcher
            .fetch_region("Lambeth", &big_square(), &period())
            .await
            .unwrap();

        // The three healthy quadrants all report crime 7.
        assert_eq!(fetched.result.count(), 1);
        assert_eq!(fetched.degraded.len(), 1);
        assert_eq!(fetched.degraded[0].label.to_string(), "Lambeth/NE");
    }

    #[tokio::test]
    async fn undecodable_response_is_not_cached() {
        let client = Arc::new(ScriptedClient::new(|_| {
            CallOutcome::Success("<html>maintenance</html>".to_string())
        }));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, client, cache.clone());

        let fetched = fetcher
            .fetch_region("Islington", &big_square(), &period())
            .await
            .unwrap();

        assert!(fetched.result.is_empty());
        assert!(matches!(
            fetched.degraded[0].reason,
            DegradeReason::UndecodablePayload(_)
        ));
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched() {
        let client = Arc::new(ScriptedClient::new(|_| {
            CallOutcome::Success(police_crimes(&[5], "2025-01"))
        }));
        let cache = Arc::new(MemoryCache::new());
        let key = CacheKey::new(RegionLabel::root("Southwark"), period());
        cache.put(&key, "{not json", None).unwrap();

        let fetcher = police_fetcher(2, client.clone(), cache.clone());
        let fetched = fetcher
            .fetch_region("Southwark", &big_square(), &period())
            .await
            .unwrap();

        assert_eq!(fetched.result.count(), 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(
            cache.get(&key).unwrap().unwrap().raw_payload,
            police_crimes(&[5], "2025-01")
        );
    }

    #[tokio::test]
    async fn counts_from_quadrants_are_summed() {
        let client = Arc::new(ScriptedClient::new(|query| match quadrant_of(query) {
            None => CallOutcome::CapacityExceeded,
            Some(Quadrant::Nw) => CallOutcome::Success("1".to_string()),
            Some(Quadrant::Ne) => CallOutcome::Success("2".to_string()),
            Some(Quadrant::Sw) => CallOutcome::Success("3".to_string()),
            Some(Quadrant::Se) => CallOutcome::Success(r#"{"count": 4}"#.to_string()),
        }));
        let cache = Arc::new(MemoryCache::new());
        let fetcher = AdaptiveFetcher::new(
            2,
            Arc::new(PolicePolyEncoder { max_vertices: 25 }),
            Arc::new(CountCodec),
            client,
            cache.clone(),
        );

        let fetched = fetcher
            .fetch_region("Greenwich", &big_square(), &period())
            .await
            .unwrap();

        assert_eq!(fetched.result, QueryResult::Count(10));
        let root_key = CacheKey::new(RegionLabel::root("Greenwich"), period());
        assert_eq!(
            cache.get(&root_key).unwrap().unwrap().raw_payload,
            r#"{"count":10}"#
        );
    }

    #[tokio::test]
    async fn unencodable_region_fails_fast() {
        struct Refuse;
        impl QueryEncoder for Refuse {
            fn encode(&self, _: &Region, _: &TimePeriod) -> Result<EncodedQuery, FetchError> {
                Err(RegionError::Empty.into())
            }
        }

        let client = Arc::new(ScriptedClient::new(|_| CallOutcome::CapacityExceeded));
        let fetcher = AdaptiveFetcher::new(
            2,
            Arc::new(Refuse),
            Arc::new(PoliceCrimesCodec),
            client.clone(),
            Arc::new(MemoryCache::new()),
        );

        let result = fetcher
            .fetch_region("Nowhere", &big_square(), &period())
            .await;
        assert!(matches!(result, Err(FetchError::InvalidRegion(_))));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn timed_out_endpoint_falls_back_to_mirror() {
        let slow = hanging_server().await;
        let fallback_body: &'static str = r#"[{"category": "bicycle-theft", "id": 99,
            "month": "2025-01", "location": {"latitude": "51.5", "longitude": "-0.1"}}]"#;
        let fast = serve_once(200, fallback_body).await;

        let client = HttpEndpointClient::new(
            reqwest::Client::builder()
                .timeout(Duration::from_millis(200))
                .build()
                .unwrap(),
            vec![slow, fast],
            Duration::ZERO,
            Some(reqwest::StatusCode::SERVICE_UNAVAILABLE),
        );
        let cache = Arc::new(MemoryCache::new());
        let fetcher = police_fetcher(2, Arc::new(client), cache.clone());

        let fetched = fetcher
            .fetch_region("Tower Hamlets", &big_square(), &period())
            .await
            .unwrap();

        assert_eq!(fetched.result.count(), 1);
        assert!(!fetched.is_degraded());
        assert_eq!(cache.writes(), 1);
        let key = CacheKey::new(RegionLabel::root("Tower Hamlets"), period());
        assert_eq!(cache.get(&key).unwrap().unwrap().raw_payload, fallback_body);
    }

    #[test]
    fn empty_result_matches_codec_shape() {
        let fetcher = AdaptiveFetcher::new(
            2,
            Arc::new(PolicePolyEncoder { max_vertices: 25 }),
            Arc::new(CountCodec),
            Arc::new(ScriptedClient::new(|_| CallOutcome::CapacityExceeded)),
            Arc::new(MemoryCache::new()),
        );
        let fetched = fetcher.degraded(RegionLabel::root("x"), DegradeReason::MaxDepthExceeded);
        assert_eq!(fetched.result.shape(), ResultShape::Count);
    }
}
