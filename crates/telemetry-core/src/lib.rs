//! # Telemetry Core Library
//!
//! Usage pings and referral attribution for a mobile browser. The host app
//! renders nothing from here; it constructs a [`TelemetryScheduler`] and
//! feeds it two triggers: app launch and a periodic tick.
//!
//! ## Architecture
//!
//! - **DAU Policy**: decides from persisted timestamps whether a
//!   daily/weekly/monthly usage ping is due
//! - **Referral Tracker**: one-time referral lookup followed by a multi-day
//!   finalization retry protocol
//! - **Custom Headers**: domain-scoped request headers supplied by the
//!   referral service
//! - **Storage**: typed key-value repository (SQLite or in-memory) and TOML
//!   configuration
//!
//! ## Key Components
//!
//! - [`TelemetryScheduler`]: service object wiring everything together
//! - [`DauPolicy`]: usage ping evaluation
//! - [`ReferralTracker`]: referral state machine
//! - [`KeyValueStore`]: persistence seam
//! - [`NetworkClient`]: the only path to the outside world

pub mod clock;
pub mod dau;
pub mod error;
pub mod headers;
pub mod network;
pub mod referral;
pub mod scheduler;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dau::{weeks_monday, DauPolicy, PingDecision, PingFlags, PingRecord};
pub use error::{ConfigError, CoreError, NetworkError, StoreError};
pub use headers::{CustomHeaderRule, CustomHeaderStore};
pub use network::{FinalizationStatus, HttpNetworkClient, NetworkClient, ReferralData};
pub use referral::{LookupOutcome, ReferralState, ReferralTracker, RetryOutcome, TerminalReason};
pub use scheduler::{PingReport, TelemetryScheduler, TickReport};
pub use storage::{
    Channel, KeyValueStore, KvWrite, MemoryStore, SqliteStore, TelemetryConfig, TimingConfig,
};
