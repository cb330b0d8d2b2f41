//! Daily/weekly/monthly active-user ping policy.
//!
//! [`DauPolicy::evaluate`] compares `now` with the persisted [`PingRecord`]
//! and decides whether a usage ping is due. Evaluation that finds nothing due
//! never writes to the store, so it is safe to call on every tick.
//!
//! Any due ping rewrites the record with `now`, whichever granularity fired:
//! a monthly-only ping also restarts the daily and weekly clocks.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::sync::Arc;

use crate::error::StoreError;
use crate::storage::{keys, Channel, KeyValueStore, KvWrite};

pub const DAY_SECS: i64 = 86_400;
pub const WEEK_SECS: i64 = 7 * DAY_SECS;

/// Installation week reported when none was ever recorded.
pub const DEFAULT_WEEK_OF_INSTALLATION: &str = "2016-01-04";

const PLATFORM: &str = "ios";

/// Moment of the last scheduled ping. Persisted as `[epoch, month, year]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRecord {
    pub last_ping_epoch_secs: i64,
    pub last_ping_month: u32,
    pub last_ping_year: i32,
}

impl PingRecord {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            last_ping_epoch_secs: now.timestamp(),
            last_ping_month: now.month(),
            last_ping_year: now.year(),
        }
    }

    fn to_stored(self) -> [i64; 3] {
        [
            self.last_ping_epoch_secs,
            i64::from(self.last_ping_month),
            i64::from(self.last_ping_year),
        ]
    }

    /// `None` for the wrong element count, a month outside 1..=12, or an
    /// epoch chrono cannot represent.
    fn from_stored(values: &[i64]) -> Option<Self> {
        let [epoch, month, year] = *values else {
            return None;
        };
        DateTime::from_timestamp(epoch, 0)?;
        let month = u32::try_from(month).ok().filter(|m| (1..=12).contains(m))?;
        Some(Self {
            last_ping_epoch_secs: epoch,
            last_ping_month: month,
            last_ping_year: i32::try_from(year).ok()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingFlags {
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
}

impl PingFlags {
    pub const ALL: PingFlags = PingFlags {
        daily: true,
        weekly: true,
        monthly: true,
    };

    /// Thresholds crossed between `record` and `now`.
    pub fn between(record: &PingRecord, now: DateTime<Utc>) -> Self {
        let elapsed = now.timestamp().saturating_sub(record.last_ping_epoch_secs);
        Self {
            daily: elapsed >= DAY_SECS,
            weekly: elapsed >= WEEK_SECS,
            monthly: (now.month(), now.year()) != (record.last_ping_month, record.last_ping_year),
        }
    }

    pub fn any(&self) -> bool {
        self.daily || self.weekly || self.monthly
    }
}

/// A ping that is due, with everything needed to build its query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingDecision {
    pub first: bool,
    pub flags: PingFlags,
    pub channel: Channel,
    pub app_version: String,
    /// Monday of the installation week, `YYYY-MM-DD`.
    pub week_of_installation: String,
}

impl PingDecision {
    pub fn query_params(&self, referral_code: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("platform", PLATFORM.to_string()),
            ("channel", self.channel.as_str().to_string()),
            ("version", self.app_version.clone()),
            ("first", self.first.to_string()),
            ("woi", self.week_of_installation.clone()),
            ("daily", self.flags.daily.to_string()),
            ("weekly", self.flags.weekly.to_string()),
            ("monthly", self.flags.monthly.to_string()),
        ];
        if let Some(code) = referral_code {
            params.push(("ref", code.to_string()));
        }
        params
    }

    /// `base` with this ping's query appended.
    pub fn url(&self, base: &str, referral_code: Option<&str>) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(base)?;
        url.query_pairs_mut()
            .extend_pairs(self.query_params(referral_code));
        Ok(url)
    }
}

/// Monday on or before `date`. Sunday belongs to the week that started six
/// days earlier.
pub fn weeks_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn format_week(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub struct DauPolicy<S> {
    store: Arc<S>,
    channel: Channel,
    app_version: String,
}

impl<S: KeyValueStore> DauPolicy<S> {
    pub fn new(store: Arc<S>, channel: Channel, app_version: impl Into<String>) -> Self {
        Self {
            store,
            channel,
            app_version: app_version.into(),
        }
    }

    /// Last ping record, or `None` when absent or unusable.
    pub fn last_ping(&self) -> Result<Option<PingRecord>, StoreError> {
        let stored = match self.store.get_json::<Vec<i64>>(keys::DAU_LAST_LAUNCH_INFO) {
            Ok(stored) => stored,
            Err(StoreError::Malformed { key, message }) => {
                tracing::warn!(%key, %message, "unreadable ping record, treating as first launch");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(values) = stored else {
            return Ok(None);
        };
        let record = PingRecord::from_stored(&values);
        if record.is_none() {
            tracing::warn!(?values, "implausible ping record, treating as first launch");
        }
        Ok(record)
    }

    /// Decide whether a ping is due at `now`, persisting the new record if so.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Result<Option<PingDecision>, StoreError> {
        let previous = self.last_ping()?;
        let first = previous.is_none();
        let flags = match &previous {
            None => PingFlags::ALL,
            Some(record) => PingFlags::between(record, now),
        };

        if !flags.any() {
            tracing::debug!("no usage ping due");
            return Ok(None);
        }

        let stored_week = self.store.get_string(keys::DAU_WEEK_OF_INSTALLATION)?;
        let mut writes = vec![KvWrite::set_json(
            keys::DAU_LAST_LAUNCH_INFO,
            &PingRecord::at(now).to_stored(),
        )?];

        let week_of_installation = match (first, stored_week) {
            (_, Some(week)) => week,
            (true, None) => {
                let week = format_week(weeks_monday(now.date_naive()));
                writes.push(KvWrite::set(keys::DAU_WEEK_OF_INSTALLATION, &week));
                week
            }
            (false, None) => DEFAULT_WEEK_OF_INSTALLATION.to_string(),
        };

        self.store.write_batch(&writes)?;
        tracing::info!(
            first,
            daily = flags.daily,
            weekly = flags.weekly,
            monthly = flags.monthly,
            "usage ping due"
        );

        Ok(Some(PingDecision {
            first,
            flags,
            channel: self.channel,
            app_version: self.app_version.clone(),
            week_of_installation,
        }))
    }
}
