//! Referral attribution tracking.
//!
//! A referral is looked up once per install. Extended referrals finish
//! immediately; plain ones are tracked until the referral service confirms
//! attribution, forgets the download id, or the retry budget runs out.
//!
//! ## State Transitions
//!
//! ```text
//! Uninitialized -> LookupInFlight -> (Extended | NotFound | Tracking)
//! Tracking -> (Tracking | Confirmed | Unknown | Exhausted)
//! ```
//!
//! The caller drives the machine: [`ReferralTracker::lookup`] on launch and
//! [`ReferralTracker::check_finalization`] on every tick. Each transition is
//! written to the store in one batch.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::epoch_secs_f64;
use crate::error::{NetworkError, StoreError};
use crate::headers::CustomHeaderStore;
use crate::network::{FinalizationStatus, NetworkClient};
use crate::storage::{keys, KeyValueStore, KvWrite, TimingConfig};

/// An unconfirmed referral being tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralState {
    pub download_id: String,
    pub referral_code: String,
    pub next_check_epoch_secs: f64,
    pub retries_remaining: i32,
}

/// Why tracking ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The service confirmed attribution.
    Confirmed,
    /// The service has no record of the download id.
    DownloadIdUnknown,
    /// The retry budget ran out.
    Exhausted,
    /// Persisted tracking fields could not be read.
    Corrupt,
}

/// What a finalization result does to the tracked state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Reschedule(ReferralState),
    Destroy(TerminalReason),
}

impl ReferralState {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        epoch_secs_f64(now) >= self.next_check_epoch_secs
    }

    /// Terminal conditions in priority order: unknown download id, confirmed,
    /// budget exhausted. Anything else is inconclusive and costs one retry.
    pub fn after_check(
        &self,
        result: &Result<FinalizationStatus, NetworkError>,
        retry_interval: Duration,
    ) -> Transition {
        if matches!(result, Err(NetworkError::DownloadIdNotFound)) {
            return Transition::Destroy(TerminalReason::DownloadIdUnknown);
        }
        if matches!(result, Ok(status) if status.initialized == Some(true)) {
            return Transition::Destroy(TerminalReason::Confirmed);
        }
        if self.retries_remaining <= 1 {
            return Transition::Destroy(TerminalReason::Exhausted);
        }
        Transition::Reschedule(ReferralState {
            retries_remaining: self.retries_remaining - 1,
            next_check_epoch_secs: self.next_check_epoch_secs
                + retry_interval.num_milliseconds() as f64 / 1000.0,
            ..self.clone()
        })
    }

    fn tracking_writes(&self) -> Vec<KvWrite> {
        vec![
            KvWrite::set(keys::URP_NEXT_CHECK_AT, self.next_check_epoch_secs),
            KvWrite::set(keys::URP_RETRY_COUNT, self.retries_remaining),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The first-run lookup already completed on an earlier launch.
    AlreadyPerformed,
    /// Another lookup or retry step is outstanding.
    InFlight,
    /// No referral for this install; default headers were refreshed.
    NoReferral,
    /// Single-shot referral; the host should open the offer page.
    Extended { offer_page: Option<String> },
    /// Referral recorded; the first finalization check is due at `next_check`.
    Tracking { next_check: DateTime<Utc> },
    /// The lookup failed and stays outstanding until the next launch.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// No referral is being tracked.
    NotTracking,
    NotDue,
    Offline,
    InFlight,
    Rescheduled {
        retries_remaining: i32,
        next_check_epoch_secs: f64,
    },
    Finished(TerminalReason),
    /// The tracking state could not be read or written; the step runs again
    /// on the next tick.
    Skipped { reason: String },
}

/// `now + delay`, pinned to the latest representable instant on overflow.
fn later(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Held while a network-backed step is running.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReferralTracker<S, N> {
    store: Arc<S>,
    network: Arc<N>,
    headers: CustomHeaderStore<S>,
    timing: TimingConfig,
    in_flight: AtomicBool,
}

impl<S: KeyValueStore, N: NetworkClient> ReferralTracker<S, N> {
    pub fn new(store: Arc<S>, network: Arc<N>, timing: TimingConfig) -> Self {
        Self {
            headers: CustomHeaderStore::new(store.clone()),
            store,
            network,
            timing,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Whether the first-run lookup still has to happen.
    pub fn lookup_outstanding(&self) -> Result<bool, StoreError> {
        match self.store.get_bool(keys::URP_LOOKUP_OUTSTANDING) {
            Ok(flag) => Ok(flag.unwrap_or(true)),
            Err(StoreError::Malformed { key, message }) => {
                tracing::warn!(%key, %message, "unreadable lookup flag, assuming outstanding");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// The tracked referral, if any. Fails with `Malformed` when a download
    /// id exists but the schedule fields are missing or unreadable.
    pub fn state(&self) -> Result<Option<ReferralState>, StoreError> {
        let Some(download_id) = self.store.get_string(keys::URP_DOWNLOAD_ID)? else {
            return Ok(None);
        };
        let next_check = self.store.get_f64(keys::URP_NEXT_CHECK_AT)?;
        let retries = self.store.get_i32(keys::URP_RETRY_COUNT)?;
        let (Some(next_check_epoch_secs), Some(retries_remaining)) = (next_check, retries) else {
            return Err(StoreError::Malformed {
                key: keys::URP_NEXT_CHECK_AT.to_string(),
                message: "tracking schedule incomplete".into(),
            });
        };
        if !next_check_epoch_secs.is_finite() {
            return Err(StoreError::Malformed {
                key: keys::URP_NEXT_CHECK_AT.to_string(),
                message: format!("non-finite check time {next_check_epoch_secs}"),
            });
        }
        if retries_remaining < 0 {
            return Err(StoreError::Malformed {
                key: keys::URP_RETRY_COUNT.to_string(),
                message: format!("negative retry count {retries_remaining}"),
            });
        }
        Ok(Some(ReferralState {
            download_id,
            referral_code: self
                .store
                .get_string(keys::URP_REFERRAL_CODE)?
                .unwrap_or_default(),
            next_check_epoch_secs,
            retries_remaining,
        }))
    }

    /// First-run referral lookup.
    pub async fn lookup(
        &self,
        now: DateTime<Utc>,
        referral_hint: Option<&str>,
    ) -> Result<LookupOutcome, StoreError> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            return Ok(LookupOutcome::InFlight);
        };
        if !self.lookup_outstanding()? || self.store.get_string(keys::URP_DOWNLOAD_ID)?.is_some() {
            return Ok(LookupOutcome::AlreadyPerformed);
        }

        let referral = match self.network.lookup_referral(referral_hint).await {
            Ok(referral) => referral,
            Err(e) => {
                tracing::warn!(error = %e, "referral lookup failed, retrying next launch");
                return Ok(LookupOutcome::Deferred);
            }
        };

        let done = KvWrite::set(keys::URP_LOOKUP_OUTSTANDING, false);

        let Some(data) = referral else {
            let mut writes = vec![done];
            match self.network.fetch_custom_headers().await {
                Ok(rules) => writes.push(CustomHeaderStore::<S>::replace_write(&rules)?),
                Err(e) => tracing::warn!(error = %e, "default custom headers unavailable"),
            }
            self.store.write_batch(&writes)?;
            tracing::info!("no referral for this install");
            return Ok(LookupOutcome::NoReferral);
        };

        let rules = data.header_rules();
        let mut writes = vec![done];
        if !rules.is_empty() {
            writes.push(CustomHeaderStore::<S>::replace_write(&rules)?);
        }

        if data.is_extended() {
            self.store.write_batch(&writes)?;
            tracing::info!("extended referral, nothing to track");
            return Ok(LookupOutcome::Extended {
                offer_page: data.offer_page,
            });
        }

        let next_check = later(now, self.timing.first_check_delay);
        let state = ReferralState {
            download_id: data.download_id,
            referral_code: data.referral_code,
            next_check_epoch_secs: epoch_secs_f64(next_check),
            retries_remaining: self.timing.max_retries,
        };
        writes.push(KvWrite::set(keys::URP_DOWNLOAD_ID, &state.download_id));
        writes.push(KvWrite::set(keys::URP_REFERRAL_CODE, &state.referral_code));
        writes.extend(state.tracking_writes());
        self.store.write_batch(&writes)?;

        tracing::info!(
            retries_remaining = state.retries_remaining,
            %next_check,
            "tracking referral"
        );
        Ok(LookupOutcome::Tracking { next_check })
    }

    /// One retry step. Does nothing until the scheduled check time.
    pub async fn check_finalization(&self, now: DateTime<Utc>) -> Result<RetryOutcome, StoreError> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            return Ok(RetryOutcome::InFlight);
        };

        let state = match self.state() {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(RetryOutcome::NotTracking),
            Err(StoreError::Malformed { key, message }) => {
                tracing::warn!(%key, %message, "dropping unreadable referral tracking state");
                self.destroy()?;
                return Ok(RetryOutcome::Finished(TerminalReason::Corrupt));
            }
            Err(e) => return Err(e),
        };

        if !state.is_due(now) {
            return Ok(RetryOutcome::NotDue);
        }
        if !self.network.is_online() {
            tracing::debug!("offline, skipping finalization check");
            return Ok(RetryOutcome::Offline);
        }

        let result = self.network.check_finalization(&state.download_id).await;
        if let Err(e) = &result {
            if e.is_transient() {
                tracing::warn!(error = %e, "finalization check failed");
            }
        }

        match state.after_check(&result, self.timing.retry_interval) {
            Transition::Destroy(reason) => {
                self.destroy()?;
                tracing::info!(?reason, "referral tracking finished");
                Ok(RetryOutcome::Finished(reason))
            }
            Transition::Reschedule(next) => {
                self.store.write_batch(&next.tracking_writes())?;
                tracing::debug!(
                    retries_remaining = next.retries_remaining,
                    next_check_epoch_secs = next.next_check_epoch_secs,
                    "finalization inconclusive"
                );
                Ok(RetryOutcome::Rescheduled {
                    retries_remaining: next.retries_remaining,
                    next_check_epoch_secs: next.next_check_epoch_secs,
                })
            }
        }
    }

    /// Referral code to attach to usage pings.
    ///
    /// The first read starts the code's expiry clock; reads at or after the
    /// expiry purge the code for good.
    pub fn referral_code(&self, now: DateTime<Utc>) -> Result<Option<String>, StoreError> {
        let Some(code) = self.store.get_string(keys::URP_REFERRAL_CODE)? else {
            return Ok(None);
        };

        let delete_at = match self.store.get_f64(keys::URP_REFERRAL_CODE_DELETE_AT) {
            Ok(delete_at) => delete_at,
            Err(StoreError::Malformed { key, message }) => {
                tracing::warn!(%key, %message, "unreadable referral code expiry, restarting it");
                None
            }
            Err(e) => return Err(e),
        };

        match delete_at {
            None => {
                let delete_at = epoch_secs_f64(later(now, self.timing.code_expiry));
                self.store
                    .set_raw(keys::URP_REFERRAL_CODE_DELETE_AT, &delete_at.to_string())?;
                Ok(Some(code))
            }
            Some(delete_at) if epoch_secs_f64(now) >= delete_at => {
                self.store.write_batch(&[
                    KvWrite::remove(keys::URP_REFERRAL_CODE),
                    KvWrite::remove(keys::URP_REFERRAL_CODE_DELETE_AT),
                ])?;
                tracing::info!("referral code expired");
                Ok(None)
            }
            Some(_) => Ok(Some(code)),
        }
    }

    /// Clear the tracking record. The referral code stays until its own
    /// expiry purges it.
    fn destroy(&self) -> Result<(), StoreError> {
        self.store.write_batch(&[
            KvWrite::remove(keys::URP_DOWNLOAD_ID),
            KvWrite::remove(keys::URP_NEXT_CHECK_AT),
            KvWrite::remove(keys::URP_RETRY_COUNT),
        ])
    }
}
