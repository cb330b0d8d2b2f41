//! Durable, string-keyed storage for scheduler state.
//!
//! The scheduler only ever talks to [`KeyValueStore`]. Values are kept as
//! text and decoded by the typed accessors; a value that exists but does not
//! decode is reported as [`StoreError::Malformed`] so callers can treat it as
//! "no usable state".

mod config;
pub mod database;
pub mod keys;
mod memory;

pub use config::{Channel, ReferralServiceConfig, TelemetryConfig, TimingConfig, TimingOverrides};
pub use database::SqliteStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::StoreError;

/// Returns `~/.config/telemetry[-dev]/` based on TELEMETRY_ENV.
///
/// Set TELEMETRY_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TELEMETRY_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("telemetry-dev")
    } else {
        base_dir.join("telemetry")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// One entry of an atomic write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum KvWrite {
    Set { key: String, value: String },
    Remove { key: String },
}

impl KvWrite {
    pub fn set(key: &str, value: impl ToString) -> Self {
        KvWrite::Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Self, StoreError> {
        let value = serde_json::to_string(value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(KvWrite::Set {
            key: key.to_string(),
            value,
        })
    }

    pub fn remove(key: &str) -> Self {
        KvWrite::Remove {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            KvWrite::Set { key, .. } | KvWrite::Remove { key } => key,
        }
    }
}

/// Typed get/set by string key, durable across restarts.
///
/// Implementors provide raw text access and an atomic batch write; every
/// write belonging to a single state transition goes through
/// [`KeyValueStore::write_batch`].
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Apply all writes or none of them.
    fn write_batch(&self, writes: &[KvWrite]) -> Result<(), StoreError>;

    fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_batch(&[KvWrite::set(key, value)])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.write_batch(&[KvWrite::remove(key)])
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_raw(key)
    }

    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.get_raw(key)?
            .map(|raw| parse_value(key, &raw))
            .transpose()
    }

    fn get_i32(&self, key: &str) -> Result<Option<i32>, StoreError> {
        self.get_raw(key)?
            .map(|raw| parse_value(key, &raw))
            .transpose()
    }

    fn get_f64(&self, key: &str) -> Result<Option<f64>, StoreError> {
        self.get_raw(key)?
            .map(|raw| parse_value(key, &raw))
            .transpose()
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        self.get_raw(key)?
            .map(|raw| parse_value(key, &raw))
            .transpose()
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        Self: Sized,
    {
        self.get_raw(key)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| StoreError::Malformed {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}
