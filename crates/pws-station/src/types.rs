use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of each value column when a metric is rendered.
pub const VALUE_WIDTH: usize = 7;

/// Width of the metric name column when a metric is rendered.
pub const NAME_WIDTH: usize = 13;

/// Glyph shown in place of a value the station did not report.
pub const NO_DATA: &str = "-";

/// Station code plus the API credential used to query it.
///
/// Never mutated after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct StationIdentity {
    station_id: String,
    api_key: String,
}

impl StationIdentity {
    pub fn new(station_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for StationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationIdentity")
            .field("station_id", &self.station_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Canonical metric vocabulary, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    WindDir,
    Humidity,
    Temp,
    WindSpeed,
    WindGust,
    WindChill,
    DewPoint,
    HeatIndex,
    Pressure,
    PrecipRate,
    PrecipTotal,
    Uv,
    SolarRadiation,
}

impl MetricName {
    pub const ALL: [MetricName; 13] = [
        Self::WindDir,
        Self::Humidity,
        Self::Temp,
        Self::WindSpeed,
        Self::WindGust,
        Self::WindChill,
        Self::DewPoint,
        Self::HeatIndex,
        Self::Pressure,
        Self::PrecipRate,
        Self::PrecipTotal,
        Self::Uv,
        Self::SolarRadiation,
    ];

    /// Field-name stem used by the upstream payload.
    pub fn key(&self) -> &'static str {
        match self {
            Self::WindDir => "winddir",
            Self::Humidity => "humidity",
            Self::Temp => "temp",
            Self::WindSpeed => "windspeed",
            Self::WindGust => "windgust",
            Self::WindChill => "windchill",
            Self::DewPoint => "dewpt",
            Self::HeatIndex => "heatindex",
            Self::Pressure => "pressure",
            Self::PrecipRate => "precipRate",
            Self::PrecipTotal => "precipTotal",
            Self::Uv => "uv",
            Self::SolarRadiation => "solarRadiation",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single named quantity with independently optional high/average/low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: MetricName,
    pub high: Option<f64>,
    pub avg: Option<f64>,
    pub low: Option<f64>,
}

impl Metric {
    pub fn empty(name: MetricName) -> Self {
        Self {
            name,
            high: None,
            avg: None,
            low: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.high.is_some() || self.avg.is_some() || self.low.is_some()
    }
}

/// Renders a value right-aligned in a fixed-width column, or the no-data glyph.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:>width$.2}", v, width = VALUE_WIDTH),
        None => format!("{:>width$}", NO_DATA, width = VALUE_WIDTH),
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<name_width$} Max. {}    Avg. {}    Min. {}",
            self.name.key(),
            format_value(self.high),
            format_value(self.avg),
            format_value(self.low),
            name_width = NAME_WIDTH,
        )
    }
}

/// Geographic position of a station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// One normalized observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    /// Observation time, seconds since the Unix epoch.
    pub epoch: i64,
    pub position: Option<Position>,
    pub elevation: Option<f64>,
    pub obs_time_utc: Option<String>,
    pub obs_time_local: Option<String>,
    pub timezone: Option<String>,
    pub metrics: Vec<Metric>,
}

impl Reading {
    /// Seconds elapsed between the observation and `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.epoch
    }

    /// Seconds elapsed since the observation.
    pub fn age(&self) -> i64 {
        self.age_at(Utc::now())
    }

    pub fn metric(&self, name: MetricName) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observed = self
            .obs_time_local
            .as_deref()
            .or(self.obs_time_utc.as_deref())
            .unwrap_or(NO_DATA);
        write!(f, "{} @ {}", self.station_id, observed)?;
        if let Some(tz) = &self.timezone {
            write!(f, " ({})", tz)?;
        }
        writeln!(f, ", {}s old", self.age())?;
        for metric in &self.metrics {
            writeln!(f, "{}", metric)?;
        }
        Ok(())
    }
}
