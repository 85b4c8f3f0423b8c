//! Station client: cached, throttled access to one station's observations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

use crate::cache::{CachePolicy, CacheSlot, CachedResponse, Freshness, VerifyBy};
use crate::error::StationError;
use crate::normalize::{Normalizer, RawObservation};
use crate::transport::{Endpoint, HttpTransport, QueryOptions, Transport, PWS_API_BASE};
use crate::types::{Position, Reading, StationIdentity};

/// Everything needed to build a [`StationClient`] besides its identity.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub query: QueryOptions,
    pub policy: CachePolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: PWS_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            query: QueryOptions::default(),
            policy: CachePolicy::default(),
        }
    }
}

/// Last known station location, readable without waiting on a fetch.
#[derive(Debug, Clone, Copy, Default)]
struct Location {
    position: Option<Position>,
    elevation: Option<f64>,
}

pub struct StationClient<T = HttpTransport> {
    identity: StationIdentity,
    policy: CachePolicy,
    transport: Arc<T>,
    normalizer: Normalizer,
    slot: Mutex<CacheSlot>,
    location: RwLock<Location>,
}

impl StationClient<HttpTransport> {
    /// Creates a client talking to the HTTPS API.
    pub fn new(identity: StationIdentity, options: ClientOptions) -> Result<Self, StationError> {
        let transport = HttpTransport::new(&options.base_url, options.timeout, options.query)
            .map_err(|e| StationError::Config(e.to_string()))?;
        Ok(Self::with_transport(identity, options.policy, transport))
    }
}

impl<T: Transport> StationClient<T> {
    pub fn with_transport(identity: StationIdentity, policy: CachePolicy, transport: T) -> Self {
        Self {
            identity,
            policy,
            transport: Arc::new(transport),
            normalizer: Normalizer::new(),
            slot: Mutex::new(CacheSlot::new()),
            location: RwLock::new(Location::default()),
        }
    }

    pub fn station_id(&self) -> &str {
        self.identity.station_id()
    }

    /// Position reported by the most recent fetch, if any.
    pub fn position(&self) -> Option<Position> {
        self.location.read().position
    }

    /// Elevation reported by the most recent fetch, if any.
    pub fn elevation(&self) -> Option<f64> {
        self.location.read().elevation
    }

    /// The newest reading, refreshed according to the cache policy.
    #[instrument(skip(self), fields(station = self.station_id()), level = "debug")]
    pub async fn get_current(&self) -> Result<Reading, StationError> {
        let mut slot = self.slot.lock().await;
        let response = self.refresh(&mut slot).await?;
        Ok(response.newest().clone())
    }

    /// Up to `count` of the most recent readings, newest first.
    #[instrument(skip(self), fields(station = self.station_id()), level = "debug")]
    pub async fn get_observations(&self, count: usize) -> Result<Vec<Reading>, StationError> {
        let mut slot = self.slot.lock().await;
        let response = self.refresh(&mut slot).await?;
        Ok(response.latest(count))
    }

    /// Applies the freshness policy and returns the slot's response.
    ///
    /// Runs entirely under the slot lock.
    async fn refresh<'a>(&self, slot: &'a mut CacheSlot) -> Result<&'a CachedResponse, StationError> {
        let freshness = slot.freshness(&self.policy, Utc::now(), Instant::now());
        tracing::debug!(?freshness, "cache check");

        match freshness {
            Freshness::Missing => {
                let records = self.fetch(slot, Endpoint::All).await?;
                self.store(slot, records)?;
            }
            Freshness::Fresh | Freshness::Throttled => {}
            Freshness::Verify => self.verify(slot).await?,
        }

        slot.response()
            .ok_or_else(|| StationError::malformed(self.station_id(), "no observations cached"))
    }

    /// Probes upstream and replaces the cache only when it has moved on.
    ///
    /// Connection failures here are logged and the stale cache is kept.
    async fn verify(&self, slot: &mut CacheSlot) -> Result<(), StationError> {
        let (cached_epoch, cached_count) = match slot.response() {
            Some(response) => (response.newest().epoch, response.record_count()),
            None => return Ok(()),
        };

        let outcome = match self.policy.verify_by {
            VerifyBy::Epoch => self.verify_epoch(slot, cached_epoch).await,
            VerifyBy::RecordCount => self.verify_count(slot, cached_count).await,
        };

        match outcome {
            Err(e) if e.is_connection_failure() => {
                tracing::warn!(error = %e, "verification failed, serving cached data");
                Ok(())
            }
            other => other,
        }
    }

    async fn verify_epoch(&self, slot: &mut CacheSlot, cached_epoch: i64) -> Result<(), StationError> {
        let probe = self.fetch(slot, Endpoint::Current).await?;
        let Some(latest) = probe.last() else {
            tracing::debug!("current endpoint has nothing to report, keeping cache");
            return Ok(());
        };
        let epoch = latest
            .get("epoch")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| StationError::malformed(self.station_id(), "observation has no epoch"))?;

        // The day listing lags the current endpoint, so compare probe to probe.
        let baseline = slot.verified_epoch().unwrap_or(cached_epoch);
        if epoch == baseline {
            tracing::debug!(epoch, "upstream unchanged");
            slot.set_verified_epoch(epoch);
            return Ok(());
        }

        tracing::info!(baseline, epoch, "new observation upstream, refetching");
        let records = self.fetch(slot, Endpoint::All).await?;
        self.store(slot, records)?;
        slot.set_verified_epoch(epoch);
        Ok(())
    }

    async fn verify_count(&self, slot: &mut CacheSlot, cached_count: usize) -> Result<(), StationError> {
        let records = self.fetch(slot, Endpoint::All).await?;

        if records.len() == cached_count {
            tracing::debug!(count = cached_count, "upstream unchanged");
            return Ok(());
        }

        tracing::info!(cached_count, count = records.len(), "record count changed");
        self.store(slot, records)
    }

    async fn fetch(
        &self,
        slot: &mut CacheSlot,
        endpoint: Endpoint,
    ) -> Result<Vec<RawObservation>, StationError> {
        slot.mark_network_call(Instant::now());
        self.transport
            .observations(&self.identity, endpoint)
            .await
            .map_err(|e| StationError::from_transport(self.station_id(), e))
    }

    /// Normalizes a full listing and swaps it into the slot.
    ///
    /// Nothing is replaced unless every record normalizes.
    fn store(&self, slot: &mut CacheSlot, records: Vec<RawObservation>) -> Result<(), StationError> {
        let readings = records
            .iter()
            .map(|raw| self.normalizer.normalize(self.station_id(), raw))
            .collect::<Result<Vec<_>, _>>()?;

        let response = CachedResponse::from_upstream(readings)
            .ok_or_else(|| StationError::malformed(self.station_id(), "empty observation list"))?;

        let newest = response.newest();
        *self.location.write() = Location {
            position: newest.position,
            elevation: newest.elevation,
        };
        tracing::info!(
            count = response.record_count(),
            epoch = newest.epoch,
            "cached observations"
        );

        slot.replace(response);
        Ok(())
    }
}

impl<T> fmt::Display for StationClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Station {}", self.identity.station_id())?;
        let location = *self.location.read();
        if let Some(position) = location.position {
            write!(f, " at {}", position)?;
        }
        if let Some(elevation) = location.elevation {
            write!(f, ", elevation {:.1}", elevation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::error::TransportError;
    use crate::types::MetricName;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport: replies are consumed in order, calls are counted.
    #[derive(Default)]
    struct FakeTransport {
        replies: parking_lot::Mutex<VecDeque<Result<Vec<RawObservation>, TransportError>>>,
        all_calls: AtomicUsize,
        current_calls: AtomicUsize,
    }

    impl FakeTransport {
        fn reply(self, reply: Result<Vec<RawObservation>, TransportError>) -> Self {
            self.replies.lock().push_back(reply);
            self
        }

        fn ok(self, epochs: &[i64]) -> Self {
            self.reply(Ok(epochs.iter().map(|e| record(*e)).collect()))
        }

        fn down(self) -> Self {
            self.reply(Err(TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            }))
        }

        fn calls(&self) -> (usize, usize) {
            (
                self.all_calls.load(Ordering::SeqCst),
                self.current_calls.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn observations(
            &self,
            _identity: &StationIdentity,
            endpoint: Endpoint,
        ) -> Result<Vec<RawObservation>, TransportError> {
            match endpoint {
                Endpoint::All => self.all_calls.fetch_add(1, Ordering::SeqCst),
                Endpoint::Current => self.current_calls.fetch_add(1, Ordering::SeqCst),
            };
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Decode("no scripted reply".into())))
        }
    }

    fn record(epoch: i64) -> RawObservation {
        let value = json!({
            "stationID": "IGODAL20",
            "epoch": epoch,
            "obsTimeUtc": "2026-10-18T10:00:00Z",
            "tz": "Europe/Oslo",
            "lat": 59.91,
            "lon": 10.75,
            "tempHigh": 12.0,
            "metric": {"tempLow": 4.0, "elev": 23.0}
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn ago(secs: i64) -> i64 {
        Utc::now().timestamp() - secs
    }

    fn policy(verify_by: VerifyBy) -> CachePolicy {
        CachePolicy {
            staleness: Duration::from_secs(300),
            min_interval: Duration::ZERO,
            verify_by,
        }
    }

    fn client(transport: FakeTransport, policy: CachePolicy) -> StationClient<FakeTransport> {
        StationClient::with_transport(StationIdentity::new("IGODAL20", "key"), policy, transport)
    }

    #[tokio::test]
    async fn test_first_call_fetches_and_normalizes() {
        let newest = ago(60);
        let client = client(FakeTransport::default().ok(&[ago(120), newest]), policy(VerifyBy::Epoch));

        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, newest);
        let temp = reading.metric(MetricName::Temp).unwrap();
        assert_eq!(temp.high, Some(12.0));
        assert_eq!(temp.low, Some(4.0));
        assert_eq!(client.transport.calls(), (1, 0));
        assert_eq!(client.elevation(), Some(23.0));
        assert_eq!(client.position().map(|p| p.latitude), Some(59.91));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() {
        let client = client(FakeTransport::default().ok(&[ago(10)]), policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        client.get_current().await.unwrap();
        client.get_observations(5).await.unwrap();

        assert_eq!(client.transport.calls(), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window_limits_fetches() {
        let policy = CachePolicy {
            staleness: Duration::from_secs(300),
            min_interval: Duration::from_secs(5),
            verify_by: VerifyBy::Epoch,
        };
        // Stale from the start, so only the throttle keeps the second call off the network.
        let client = client(FakeTransport::default().ok(&[ago(400)]), policy);

        client.get_current().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        client.get_current().await.unwrap();

        assert_eq!(client.transport.calls(), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_after_throttle_window() {
        let old = ago(400);
        let policy = CachePolicy {
            staleness: Duration::from_secs(300),
            min_interval: Duration::from_secs(5),
            verify_by: VerifyBy::Epoch,
        };
        let client = client(FakeTransport::default().ok(&[old]).ok(&[old]), policy);

        client.get_current().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        client.get_current().await.unwrap();

        assert_eq!(client.transport.calls(), (1, 1));
    }

    #[tokio::test]
    async fn test_unchanged_epoch_keeps_cache() {
        let old = ago(400);
        let transport = FakeTransport::default()
            .ok(&[ago(500), old])
            .ok(&[old])
            .ok(&[old]);
        let client = client(transport, policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, old);
        // One full fetch, one probe, no second full fetch.
        assert_eq!(client.transport.calls(), (1, 1));
        assert_eq!(client.get_observations(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_newer_epoch_replaces_cache() {
        let old = ago(400);
        let new = ago(30);
        let transport = FakeTransport::default()
            .ok(&[old])
            .ok(&[new])
            .ok(&[old, new]);
        let client = client(transport, policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, new);
        assert_eq!(client.transport.calls(), (2, 1));

        let epochs: Vec<_> = client
            .get_observations(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.epoch)
            .collect();
        assert_eq!(epochs, vec![new, old]);
    }

    #[tokio::test]
    async fn test_current_epoch_ahead_of_listing_refetches_once() {
        let listed = ago(400);
        let current = ago(60);
        let transport = FakeTransport::default()
            .ok(&[listed])
            .ok(&[current])
            .ok(&[listed])
            .ok(&[current])
            .ok(&[current]);
        let client = client(transport, policy(VerifyBy::Epoch));

        for _ in 0..4 {
            let reading = client.get_current().await.unwrap();
            assert_eq!(reading.epoch, listed);
        }

        // The listing never catches up, but the current epoch stops moving.
        assert_eq!(client.transport.calls(), (2, 3));
        assert_eq!(client.slot.lock().await.verified_epoch(), Some(current));
    }

    #[tokio::test]
    async fn test_empty_probe_keeps_cache() {
        let old = ago(400);
        let transport = FakeTransport::default().ok(&[old]).ok(&[]);
        let client = client(transport, policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, old);
        assert_eq!(client.transport.calls(), (1, 1));
    }

    #[tokio::test]
    async fn test_record_count_unchanged_keeps_cache() {
        let old = ago(400);
        let transport = FakeTransport::default().ok(&[old]).ok(&[old]);
        let client = client(transport, policy(VerifyBy::RecordCount));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, old);
        assert_eq!(client.transport.calls(), (2, 0));
    }

    #[tokio::test]
    async fn test_record_count_changed_replaces_from_probe() {
        let old = ago(400);
        let new = ago(20);
        let transport = FakeTransport::default().ok(&[old]).ok(&[old, new]);
        let client = client(transport, policy(VerifyBy::RecordCount));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, new);
        assert_eq!(client.transport.calls(), (2, 0));
    }

    #[tokio::test]
    async fn test_probe_failure_serves_stale_cache() {
        let old = ago(400);
        let transport = FakeTransport::default().ok(&[old]).down();
        let client = client(transport, policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, old);
    }

    #[tokio::test]
    async fn test_refetch_failure_after_probe_serves_stale_cache() {
        let old = ago(400);
        let transport = FakeTransport::default().ok(&[old]).ok(&[ago(5)]).down();
        let client = client(transport, policy(VerifyBy::Epoch));

        client.get_current().await.unwrap();
        let reading = client.get_current().await.unwrap();

        assert_eq!(reading.epoch, old);
        assert_eq!(client.transport.calls(), (2, 1));
    }

    #[tokio::test]
    async fn test_mandatory_fetch_failure_is_connection_failure() {
        let client = client(FakeTransport::default().down(), policy(VerifyBy::Epoch));

        let err = client.get_current().await.unwrap_err();

        assert!(matches!(err, StationError::ConnectionFailure { ref station, .. } if station == "IGODAL20"));
        assert!(client.slot.lock().await.response().is_none());
        assert_eq!(client.position(), None);
    }

    #[tokio::test]
    async fn test_empty_observations_is_malformed() {
        let client = client(FakeTransport::default().ok(&[]), policy(VerifyBy::Epoch));

        let err = client.get_current().await.unwrap_err();

        assert!(matches!(err, StationError::MalformedPayload { .. }));
        assert!(client.slot.lock().await.response().is_none());
    }

    #[tokio::test]
    async fn test_empty_refetch_leaves_cache_unchanged() {
        let old = ago(400);
        let transport = FakeTransport::default().ok(&[old]).ok(&[]);
        let client = client(transport, policy(VerifyBy::RecordCount));

        client.get_current().await.unwrap();
        let err = client.get_current().await.unwrap_err();

        assert!(matches!(err, StationError::MalformedPayload { .. }));
        let slot = client.slot.lock().await;
        assert_eq!(slot.response().map(|r| r.newest().epoch), Some(old));
    }

    #[tokio::test]
    async fn test_record_without_epoch_is_malformed() {
        let mut bad = record(ago(10));
        bad.remove("epoch");
        let client = client(
            FakeTransport::default().reply(Ok(vec![record(ago(20)), bad])),
            policy(VerifyBy::Epoch),
        );

        let err = client.get_observations(2).await.unwrap_err();

        assert!(matches!(err, StationError::MalformedPayload { .. }));
        assert!(client.slot.lock().await.response().is_none());
    }

    #[tokio::test]
    async fn test_get_observations_caps_count() {
        let client = client(
            FakeTransport::default().ok(&[ago(30), ago(20), ago(10)]),
            policy(VerifyBy::Epoch),
        );

        let readings = client.get_observations(2).await.unwrap();

        assert_eq!(readings.len(), 2);
        assert!(readings[0].epoch > readings[1].epoch);
        assert!(client.get_observations(0).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let client = Arc::new(client(FakeTransport::default().ok(&[ago(10)]), policy(VerifyBy::Epoch)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_current().await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.transport.calls(), (1, 0));
    }

    #[test]
    fn test_display_before_fetch() {
        let client = client(FakeTransport::default(), CachePolicy::default());
        assert_eq!(client.to_string(), "Station IGODAL20");
    }
}
