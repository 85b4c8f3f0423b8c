//! Upstream access: the [`Transport`] seam and its reqwest implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::error::TransportError;
use crate::normalize::RawObservation;
use crate::types::StationIdentity;

pub const PWS_API_BASE: &str = "https://api.weather.com";

/// Every observation from the last day, oldest first.
pub const ALL_PATH: &str = "/v2/pws/observations/all/1day";

/// The single most recent observation.
pub const CURRENT_PATH: &str = "/v2/pws/observations/current";

/// Which upstream listing to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    All,
    Current,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::All => ALL_PATH,
            Self::Current => CURRENT_PATH,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
}

/// Fetches raw observation lists for a station.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the `observations` array of `endpoint`, in upstream order.
    async fn observations(
        &self,
        identity: &StationIdentity,
        endpoint: Endpoint,
    ) -> Result<Vec<RawObservation>, TransportError>;
}

/// Query options sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub numeric_precision: String,
    pub format: String,
    pub units: String,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            numeric_precision: "decimal".to_string(),
            format: "json".to_string(),
            units: "m".to_string(),
        }
    }
}

/// HTTPS transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
    base_url: String,
    query: QueryOptions,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        query: QueryOptions,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            query,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, identity), fields(station = identity.station_id()), level = "debug")]
    async fn observations(
        &self,
        identity: &StationIdentity,
        endpoint: Endpoint,
    ) -> Result<Vec<RawObservation>, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint.path());

        let response = self
            .client
            .get(&url)
            .query(&[
                ("stationId", identity.station_id()),
                ("apiKey", identity.api_key()),
                ("numericPrecision", self.query.numeric_precision.as_str()),
                ("format", self.query.format.as_str()),
                ("units", self.query.units.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TransportError::Request(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // The API answers 204 when the station has nothing to report.
        if status.as_u16() == 204 {
            return Ok(Vec::new());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.without_url()))?;
        let parsed: ObservationsResponse = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Decode(format!("JSON parse error: {}", e)))?;

        tracing::debug!(count = parsed.observations.len(), "fetched observations");
        Ok(parsed.observations)
    }
}
