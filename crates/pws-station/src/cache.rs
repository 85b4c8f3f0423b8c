//! Single-slot cache of the last full fetch, and the freshness policy.
//!
//! The policy is a pure function of the slot, the wall clock and the
//! monotonic clock, so it is tested here without any network.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::types::Reading;

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(300);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// How a verification probe decides whether upstream has new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyBy {
    /// Compare the epoch of the `current` endpoint against the one it reported
    /// last time, or the cached newest epoch before the first probe.
    #[default]
    Epoch,
    /// Compare the record count of the full listing against the cached count.
    RecordCount,
}

/// Timing policy of a station client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age past which a cached reading may be refreshed.
    pub staleness: Duration,
    /// Minimum spacing between network calls once data is cached.
    pub min_interval: Duration,
    pub verify_by: VerifyBy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            staleness: DEFAULT_STALENESS,
            min_interval: DEFAULT_MIN_INTERVAL,
            verify_by: VerifyBy::default(),
        }
    }
}

/// The normalized result of one full fetch.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Newest first.
    readings: Vec<Reading>,
    /// Number of records the upstream listing contained.
    record_count: usize,
}

impl CachedResponse {
    /// Builds a slot from readings in upstream order (oldest first).
    ///
    /// Returns `None` for an empty listing; a slot always has a newest reading.
    pub fn from_upstream(mut readings: Vec<Reading>) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        readings.reverse();
        Some(Self {
            record_count: readings.len(),
            readings,
        })
    }

    pub fn newest(&self) -> &Reading {
        // Construction guarantees at least one reading.
        &self.readings[0]
    }

    /// Up to `count` readings, newest first.
    pub fn latest(&self, count: usize) -> Vec<Reading> {
        self.readings.iter().take(count).cloned().collect()
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

/// What the client must do before answering a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing cached; a fetch is mandatory.
    Missing,
    /// Serve the cache without touching the network.
    Fresh,
    /// Serve the cache: it is stale but the last network call was too recent.
    Throttled,
    /// Stale and not throttled; probe upstream before refetching.
    Verify,
}

/// Mutable state guarded by the client's lock.
#[derive(Debug, Default)]
pub struct CacheSlot {
    response: Option<CachedResponse>,
    last_network_call: Option<Instant>,
    /// Epoch the `current` endpoint reported when the slot was last verified.
    verified_epoch: Option<i64>,
}

impl CacheSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(&self) -> Option<&CachedResponse> {
        self.response.as_ref()
    }

    pub fn verified_epoch(&self) -> Option<i64> {
        self.verified_epoch
    }

    pub fn set_verified_epoch(&mut self, epoch: i64) {
        self.verified_epoch = Some(epoch);
    }

    /// Records that a request was issued, whatever its outcome.
    pub fn mark_network_call(&mut self, at: Instant) {
        self.last_network_call = Some(at);
    }

    /// Replaces the cached response in one step.
    ///
    /// The verified epoch is cleared; the caller sets it once the probe that
    /// triggered the replacement is committed.
    pub fn replace(&mut self, response: CachedResponse) {
        self.response = Some(response);
        self.verified_epoch = None;
    }

    pub fn freshness(&self, policy: &CachePolicy, wall_now: DateTime<Utc>, now: Instant) -> Freshness {
        let Some(response) = &self.response else {
            return Freshness::Missing;
        };

        let age = response.newest().age_at(wall_now);
        if age < 0 || (age as u64) < policy.staleness.as_secs() {
            return Freshness::Fresh;
        }

        match self.last_network_call {
            Some(last) if now.saturating_duration_since(last) < policy.min_interval => {
                Freshness::Throttled
            }
            _ => Freshness::Verify,
        }
    }
}
