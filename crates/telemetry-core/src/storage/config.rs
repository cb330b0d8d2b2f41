//! TOML-based scheduler configuration.
//!
//! Stores:
//! - Build channel and app version reported in usage pings
//! - Stats endpoint
//! - Referral service host and API key
//! - Timing overrides for the referral protocol
//!
//! Configuration is stored at `~/.config/telemetry/telemetry.toml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Build channel reported as `channel=` on usage pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
        }
    }
}

/// Referral service endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralServiceConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
}

impl ReferralServiceConfig {
    /// Both host and key are required for the referral tracker to run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingKey("referral.host".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingKey("referral.api_key".into()));
        }
        url::Url::parse(&self.host).map_err(|e| ConfigError::InvalidValue {
            key: "referral.host".into(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// Optional per-field overrides of the timing profile, in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingOverrides {
    #[serde(default)]
    pub first_check_delay_secs: Option<i64>,
    #[serde(default)]
    pub retry_interval_secs: Option<i64>,
    #[serde(default)]
    pub code_expiry_secs: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl TimingOverrides {
    /// Reject overrides that would break the retry schedule: a negative first
    /// delay, a non-positive interval or expiry, a budget below one, or any
    /// duration chrono cannot represent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("timing.first_check_delay_secs", self.first_check_delay_secs, 0)?;
        check_secs("timing.retry_interval_secs", self.retry_interval_secs, 1)?;
        check_secs("timing.code_expiry_secs", self.code_expiry_secs, 1)?;
        if let Some(max) = self.max_retries {
            if max < 1 {
                return Err(ConfigError::InvalidValue {
                    key: "timing.max_retries".into(),
                    message: format!("must be at least 1, got {max}"),
                });
            }
        }
        Ok(())
    }
}

fn check_secs(key: &str, secs: Option<i64>, min: i64) -> Result<(), ConfigError> {
    let Some(secs) = secs else {
        return Ok(());
    };
    if secs < min {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be at least {min} seconds, got {secs}"),
        });
    }
    if Duration::try_seconds(secs).is_none() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{secs} seconds is out of range"),
        });
    }
    Ok(())
}

/// Effective timing of the referral protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Delay between a successful lookup and the first finalization check.
    pub first_check_delay: Duration,
    /// Distance between consecutive finalization checks.
    pub retry_interval: Duration,
    /// Lifetime of a surfaced referral code.
    pub code_expiry: Duration,
    /// Finalization-check budget.
    pub max_retries: i32,
}

impl TimingConfig {
    /// 30 days plus a one hour safety offset, daily retries, 90 day code expiry.
    pub fn production() -> Self {
        Self {
            first_check_delay: Duration::days(30) + Duration::hours(1),
            retry_interval: Duration::seconds(DAY_SECS),
            code_expiry: Duration::days(90),
            max_retries: 30,
        }
    }

    pub fn development() -> Self {
        Self {
            first_check_delay: Duration::minutes(10),
            retry_interval: Duration::minutes(10),
            code_expiry: Duration::minutes(20),
            max_retries: 30,
        }
    }

    /// Applies every override that passes [`TimingOverrides::validate`]'s
    /// rules; an invalid one keeps the profile value.
    fn with_overrides(mut self, overrides: &TimingOverrides) -> Self {
        let pick = |key: &str, secs: Option<i64>, min: i64| {
            let secs = secs?;
            match check_secs(key, Some(secs), min) {
                Ok(()) => Duration::try_seconds(secs),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring timing override");
                    None
                }
            }
        };

        if let Some(d) = pick("timing.first_check_delay_secs", overrides.first_check_delay_secs, 0) {
            self.first_check_delay = d;
        }
        if let Some(d) = pick("timing.retry_interval_secs", overrides.retry_interval_secs, 1) {
            self.retry_interval = d;
        }
        if let Some(d) = pick("timing.code_expiry_secs", overrides.code_expiry_secs, 1) {
            self.code_expiry = d;
        }
        match overrides.max_retries {
            Some(max) if max >= 1 => self.max_retries = max,
            Some(max) => tracing::warn!(max, "ignoring timing.max_retries override below 1"),
            None => {}
        }
        self
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Scheduler configuration.
///
/// Serialized to/from TOML at `~/.config/telemetry/telemetry.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_channel")]
    pub channel: Channel,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_stats_url")]
    pub stats_url: String,
    /// Selects the development timing profile.
    #[serde(default)]
    pub development: bool,
    #[serde(default)]
    pub referral: ReferralServiceConfig,
    #[serde(default)]
    pub timing: TimingOverrides,
}

fn default_channel() -> Channel {
    Channel::Stable
}
fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_stats_url() -> String {
    "https://laptop-updates.example.com/1/usage/ios".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            app_version: default_app_version(),
            stats_url: default_stats_url(),
            development: false,
            referral: ReferralServiceConfig::default(),
            timing: TimingOverrides::default(),
        }
    }
}

impl TelemetryConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::InvalidValue {
            key: key.to_string(),
            message: "unknown config key".into(),
        };
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(ConfigError::MissingKey("config key is empty".into()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    // Unset timing overrides serialize as null and take integers.
                    serde_json::Value::Number(_) | serde_json::Value::Null => {
                        if value == "null" {
                            serde_json::Value::Null
                        } else {
                            let n = value
                                .parse::<i64>()
                                .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?;
                            serde_json::Value::Number(n.into())
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    serde_json::Value::String(_) => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config location.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/telemetry"),
            message: e.to_string(),
        })?;
        Ok(dir.join("telemetry.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Self = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.timing.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Self =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.timing.validate()?;
        *self = updated;
        Ok(())
    }

    /// Effective timing: the profile selected by `development`, then overrides.
    pub fn timing(&self) -> TimingConfig {
        let base = if self.development {
            TimingConfig::development()
        } else {
            TimingConfig::production()
        };
        base.with_overrides(&self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = TelemetryConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: TelemetryConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.channel, Channel::Stable);
        assert!(!parsed.development);
        assert_eq!(parsed.stats_url, cfg.stats_url);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: TelemetryConfig = toml::from_str(
            r#"
            channel = "beta"

            [referral]
            host = "https://referrals.example.com"
            api_key = "key"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.channel, Channel::Beta);
        assert!(parsed.referral.validate().is_ok());
        assert_eq!(parsed.timing(), TimingConfig::production());
    }

    #[test]
    fn production_timing_constants() {
        let timing = TimingConfig::production();
        assert_eq!(timing.first_check_delay.num_seconds(), 30 * DAY_SECS + 3600);
        assert_eq!(timing.retry_interval.num_seconds(), DAY_SECS);
        assert_eq!(timing.code_expiry.num_days(), 90);
        assert_eq!(timing.max_retries, 30);
    }

    #[test]
    fn development_flag_selects_short_intervals() {
        let cfg = TelemetryConfig {
            development: true,
            ..TelemetryConfig::default()
        };
        let timing = cfg.timing();
        assert_eq!(timing.first_check_delay, Duration::minutes(10));
        assert_eq!(timing.code_expiry, Duration::minutes(20));
    }

    #[test]
    fn overrides_win_over_profile() {
        let mut cfg = TelemetryConfig::default();
        cfg.set("timing.max_retries", "5").unwrap();
        cfg.set("timing.retry_interval_secs", "60").unwrap();
        let timing = cfg.timing();
        assert_eq!(timing.max_retries, 5);
        assert_eq!(timing.retry_interval, Duration::seconds(60));
        assert_eq!(timing.code_expiry, Duration::days(90));
    }

    #[test]
    fn missing_referral_settings_fail_validation() {
        let cfg = TelemetryConfig::default();
        assert!(matches!(
            cfg.referral.validate(),
            Err(ConfigError::MissingKey(ref key)) if key == "referral.host"
        ));
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = TelemetryConfig::default();
        assert_eq!(cfg.get("channel").as_deref(), Some("stable"));
        assert_eq!(cfg.get("development").as_deref(), Some("false"));
        assert!(cfg.get("referral.missing_key").is_none());
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_types() {
        let mut cfg = TelemetryConfig::default();
        assert!(cfg.set("referral.nonexistent", "x").is_err());
        assert!(cfg.set("development", "not_a_bool").is_err());
        assert!(cfg.set("channel", "nightly").is_err());
        assert!(cfg.set("channel", "beta").is_ok());
        assert_eq!(cfg.channel, Channel::Beta);
    }

    #[test]
    fn set_rejects_out_of_range_timing() {
        let mut cfg = TelemetryConfig::default();
        for (key, value) in [
            ("timing.retry_interval_secs", "9223372036854775807"),
            ("timing.retry_interval_secs", "0"),
            ("timing.first_check_delay_secs", "-86400"),
            ("timing.code_expiry_secs", "0"),
            ("timing.max_retries", "0"),
            ("timing.max_retries", "-3"),
        ] {
            let err = cfg.set(key, value).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
        assert!(cfg.timing.retry_interval_secs.is_none());
        assert_eq!(cfg.timing(), TimingConfig::production());
    }

    #[test]
    fn zero_first_check_delay_is_allowed() {
        let mut cfg = TelemetryConfig::default();
        cfg.set("timing.first_check_delay_secs", "0").unwrap();
        assert_eq!(cfg.timing().first_check_delay, Duration::zero());
    }

    #[test]
    fn invalid_override_built_in_code_keeps_profile_value() {
        let cfg = TelemetryConfig {
            timing: TimingOverrides {
                retry_interval_secs: Some(i64::MAX),
                max_retries: Some(-1),
                first_check_delay_secs: Some(120),
                ..TimingOverrides::default()
            },
            ..TelemetryConfig::default()
        };
        let timing = cfg.timing();
        assert_eq!(timing.retry_interval, Duration::days(1));
        assert_eq!(timing.max_retries, 30);
        assert_eq!(timing.first_check_delay, Duration::seconds(120));
    }

    #[test]
    fn load_from_rejects_bad_timing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.toml");
        std::fs::write(&path, "[timing]\nretry_interval_secs = 0\n").unwrap();
        assert!(matches!(
            TelemetryConfig::load_from(&path),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "timing.retry_interval_secs"
        ));
    }

    #[test]
    fn load_from_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.toml");
        let cfg = TelemetryConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.channel, Channel::Stable);

        let mut changed = cfg.clone();
        changed.set("referral.api_key", "secret").unwrap();
        changed.save_to(&path).unwrap();
        let reloaded = TelemetryConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.referral.api_key, "secret");
    }
}
