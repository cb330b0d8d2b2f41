use std::sync::Arc;

use chrono::{DateTime, Utc};
use telemetry_core::{
    Clock, FixedClock, HttpNetworkClient, SqliteStore, SystemClock, TelemetryConfig,
    TelemetryScheduler,
};

pub mod config;
pub mod headers;
pub mod launch;
pub mod status;
pub mod tick;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub type Scheduler = TelemetryScheduler<SqliteStore, HttpNetworkClient>;

/// Scheduler over the on-disk store and the configured services.
pub fn open_scheduler(at: Option<DateTime<Utc>>) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let config = TelemetryConfig::load()?;
    let store = Arc::new(SqliteStore::open()?);

    let network = match HttpNetworkClient::with_referral(config.referral.clone()) {
        Ok(client) => client,
        Err(_) => HttpNetworkClient::new(),
    };

    let clock: Arc<dyn Clock> = match at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };

    Ok(TelemetryScheduler::new(
        config,
        store,
        Arc::new(network),
        clock,
    ))
}

pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}
