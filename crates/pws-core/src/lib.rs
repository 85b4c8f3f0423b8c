pub mod config;
pub mod error;

pub use config::{CacheConfig, Config, DisplayConfig, StationConfig, ValidationResult, VerifyMode};
pub use error::{AppError, ConfigError};

use anyhow::Result;

/// Initialize logging for the binary.
///
/// Logs go to stderr so they never interleave with printed readings.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("pws core initialized");
    Ok(())
}
