use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use pws_core::{AppError, Config, ConfigError};
use pws_station::StationClient;

#[tokio::main]
async fn main() -> Result<()> {
    pws_core::init()?;

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}

async fn run() -> Result<(), AppError> {
    let config = Config::load()?;

    let validation = config.validate();
    if !validation.is_valid() {
        return Err(ConfigError::Invalid(validation.error_summary()).into());
    }
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    let client = StationClient::new(config.identity()?, config.client_options())?;
    let refresh = config.display.refresh_secs;

    let mut reading = client.get_current().await?;

    let mut out = std::io::stdout();
    writeln!(out, "{}\n", client)?;
    write!(out, "{}", reading)?;
    writeln!(out)?;

    tracing::info!("Polling {} every {}s", client.station_id(), refresh);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(next_wait(refresh, reading.age())) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
        }

        reading = client.get_current().await?;
        write!(out, "{}", reading)?;
        writeln!(out)?;
    }
}

/// Time until a reading of age `age` next crosses a multiple of `refresh_secs`.
fn next_wait(refresh_secs: u64, age: i64) -> Duration {
    let refresh = refresh_secs.max(1);
    let age = u64::try_from(age).unwrap_or(0);
    Duration::from_secs(refresh - age % refresh)
}
