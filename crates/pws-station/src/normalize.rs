//! Conversion of raw upstream observation records into [`Reading`]s.
//!
//! Upstream payloads disagree on where a metric lives: some flatten
//! `tempHigh`/`tempLow`/`tempAvg` at the top level, some nest them under
//! `metric`, some only carry `tempMax`/`tempMin`. Every lookup goes through
//! [`LookupTable`], which lists the candidate keys for each
//! (metric, suffix) pair in the order they are tried.

use serde_json::{Map, Value};

use crate::error::StationError;
use crate::types::{Metric, MetricName, Position, Reading};

/// One upstream observation record.
pub type RawObservation = Map<String, Value>;

/// Key of the nested object carrying unit-converted values.
pub const METRIC_KEY: &str = "metric";

/// Field suffixes observed in upstream payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suffix {
    High,
    Low,
    Avg,
    Max,
    Min,
    /// No suffix; single-value endpoints report `temp` rather than `tempAvg`.
    Bare,
}

impl Suffix {
    pub const ALL: [Suffix; 6] = [
        Self::High,
        Self::Low,
        Self::Avg,
        Self::Max,
        Self::Min,
        Self::Bare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Low => "Low",
            Self::Avg => "Avg",
            Self::Max => "Max",
            Self::Min => "Min",
            Self::Bare => "",
        }
    }
}

/// Which part of the record a candidate key is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    TopLevel,
    Nested,
}

/// A single place a value may be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: KeySource,
    pub key: String,
}

impl Candidate {
    fn resolve(&self, raw: &RawObservation) -> Option<f64> {
        let value = match self.source {
            KeySource::TopLevel => raw.get(&self.key),
            KeySource::Nested => raw
                .get(METRIC_KEY)
                .and_then(Value::as_object)
                .and_then(|nested| nested.get(&self.key)),
        };
        value.and_then(numeric)
    }
}

/// Candidate keys for one (metric, suffix) pair, most specific first.
#[derive(Debug, Clone)]
pub struct LookupEntry {
    pub metric: MetricName,
    pub suffix: Suffix,
    pub candidates: Vec<Candidate>,
}

impl LookupEntry {
    fn new(metric: MetricName, suffix: Suffix) -> Self {
        let key = format!("{}{}", metric.key(), suffix.as_str());
        let candidates = [KeySource::TopLevel, KeySource::Nested]
            .into_iter()
            .map(|source| Candidate {
                source,
                key: key.clone(),
            })
            .collect();
        Self {
            metric,
            suffix,
            candidates,
        }
    }

    /// First candidate holding a real number.
    pub fn resolve(&self, raw: &RawObservation) -> Option<f64> {
        self.candidates.iter().find_map(|c| c.resolve(raw))
    }
}

/// Table of every (metric, suffix) lookup.
#[derive(Debug, Clone)]
pub struct LookupTable {
    entries: Vec<LookupEntry>,
}

impl LookupTable {
    pub fn new() -> Self {
        let entries = MetricName::ALL
            .into_iter()
            .flat_map(|metric| {
                Suffix::ALL
                    .into_iter()
                    .map(move |suffix| LookupEntry::new(metric, suffix))
            })
            .collect();
        Self { entries }
    }

    pub fn entry(&self, metric: MetricName, suffix: Suffix) -> Option<&LookupEntry> {
        self.entries
            .iter()
            .find(|e| e.metric == metric && e.suffix == suffix)
    }

    pub fn resolve(&self, raw: &RawObservation, metric: MetricName, suffix: Suffix) -> Option<f64> {
        self.entry(metric, suffix).and_then(|e| e.resolve(raw))
    }

    pub fn entries(&self) -> &[LookupEntry] {
        &self.entries
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Interprets a JSON value as a number.
///
/// Sentinels (`"-"`, empty strings, `null`, anything non-numeric) yield `None`.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Stateless converter from [`RawObservation`] to [`Reading`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    table: LookupTable,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves one metric.
    ///
    /// `High`/`Low` win whenever they hold a value; `Max`/`Min` only fill a gap.
    pub fn metric(&self, raw: &RawObservation, name: MetricName) -> Metric {
        let get = |suffix| self.table.resolve(raw, name, suffix);
        Metric {
            name,
            high: get(Suffix::High).or_else(|| get(Suffix::Max)),
            avg: get(Suffix::Avg).or_else(|| get(Suffix::Bare)),
            low: get(Suffix::Low).or_else(|| get(Suffix::Min)),
        }
    }

    /// Normalizes one record.
    ///
    /// `station` names the queried station in errors, since a malformed record
    /// may not carry its own id.
    pub fn normalize(&self, station: &str, raw: &RawObservation) -> Result<Reading, StationError> {
        let epoch = raw
            .get("epoch")
            .and_then(Value::as_i64)
            .ok_or_else(|| StationError::malformed(station, "observation has no epoch"))?;

        let station_id = raw
            .get("stationID")
            .and_then(Value::as_str)
            .ok_or_else(|| StationError::malformed(station, "observation has no stationID"))?
            .to_string();

        let position = match (
            raw.get("lat").and_then(numeric),
            raw.get("lon").and_then(numeric),
        ) {
            (Some(latitude), Some(longitude)) => Some(Position {
                latitude,
                longitude,
            }),
            _ => None,
        };

        let elevation = raw.get("elev").and_then(numeric).or_else(|| {
            raw.get(METRIC_KEY)
                .and_then(Value::as_object)
                .and_then(|nested| nested.get("elev"))
                .and_then(numeric)
        });

        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Reading {
            station_id,
            epoch,
            position,
            elevation,
            obs_time_utc: text("obsTimeUtc"),
            obs_time_local: text("obsTimeLocal"),
            timezone: text("tz"),
            metrics: MetricName::ALL
                .into_iter()
                .map(|name| self.metric(raw, name))
                .collect(),
        })
    }
}
