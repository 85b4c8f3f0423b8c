//! Personal weather station client.
//!
//! Polls the PWS observations API, keeps the latest response in a single
//! cache slot and normalizes each record into a fixed metric vocabulary.

pub mod cache;
pub mod client;
pub mod error;
pub mod normalize;
pub mod transport;
pub mod types;

pub use cache::{CachePolicy, VerifyBy};
pub use client::{ClientOptions, StationClient};
pub use error::{StationError, TransportError};
pub use normalize::{Normalizer, RawObservation};
pub use transport::{Endpoint, HttpTransport, QueryOptions, Transport};
pub use types::*;
