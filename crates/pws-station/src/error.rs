//! Station client error types.

use thiserror::Error;

/// Failure of a single upstream request.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response could not be decoded: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StationError {
    #[error("could not fetch data for {station}: {source}")]
    ConnectionFailure {
        station: String,
        #[source]
        source: TransportError,
    },

    #[error("malformed payload from {station}: {reason}")]
    MalformedPayload { station: String, reason: String },

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl StationError {
    /// Classifies a transport failure for `station`.
    ///
    /// An undecodable body means the upstream answered, so it is a payload
    /// problem rather than a connectivity one.
    pub fn from_transport(station: &str, err: TransportError) -> Self {
        match err {
            TransportError::Decode(reason) => Self::MalformedPayload {
                station: station.to_string(),
                reason,
            },
            source => Self::ConnectionFailure {
                station: station.to_string(),
                source,
            },
        }
    }

    pub fn malformed(station: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            station: station.to_string(),
            reason: reason.into(),
        }
    }

    /// User-friendly error message for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionFailure { station, .. } => {
                format!("Unable to reach station {}. Check your connection.", station)
            }
            Self::MalformedPayload { station, .. } => {
                format!("Station {} sent data that could not be read.", station)
            }
            Self::Config(_) => "Invalid station settings. Check your configuration.".to_string(),
        }
    }

    /// Whether the caller may reasonably retry this operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailure { source, .. } => source.is_retryable(),
            Self::MalformedPayload { .. } | Self::Config(_) => false,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. })
    }
}
