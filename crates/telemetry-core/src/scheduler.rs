//! Explicitly constructed service object driving pings and referral tracking.
//!
//! The host owns one [`TelemetryScheduler`] for the life of the process and
//! calls [`TelemetryScheduler::on_launch`] once after startup and
//! [`TelemetryScheduler::on_tick`] periodically (timer or foreground). The
//! scheduler spawns nothing of its own.

use std::sync::Arc;

use crate::clock::Clock;
use crate::dau::DauPolicy;
use crate::error::{NetworkError, Result};
use crate::headers::CustomHeaderStore;
use crate::network::NetworkClient;
use crate::referral::{LookupOutcome, ReferralTracker, RetryOutcome};
use crate::storage::{KeyValueStore, TelemetryConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum PingReport {
    NotDue,
    Sent { url: url::Url },
    /// Not retried; the next period's ping is the next attempt.
    Failed { url: url::Url, error: NetworkError },
    /// Evaluation or URL building failed before anything was sent.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub ping: PingReport,
    /// `None` when referral tracking is disabled for this run.
    pub retry: Option<RetryOutcome>,
}

pub struct TelemetryScheduler<S, N> {
    config: TelemetryConfig,
    network: Arc<N>,
    clock: Arc<dyn Clock>,
    dau: DauPolicy<S>,
    referral: Option<ReferralTracker<S, N>>,
    headers: CustomHeaderStore<S>,
}

impl<S: KeyValueStore, N: NetworkClient> TelemetryScheduler<S, N> {
    /// Referral tracking is disabled for the whole run when the referral
    /// service is not configured; that is reported here, once.
    pub fn new(
        config: TelemetryConfig,
        store: Arc<S>,
        network: Arc<N>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let referral = match config.referral.validate() {
            Ok(()) => Some(ReferralTracker::new(
                store.clone(),
                network.clone(),
                config.timing(),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "referral tracking disabled");
                None
            }
        };

        Self {
            dau: DauPolicy::new(store.clone(), config.channel, config.app_version.clone()),
            headers: CustomHeaderStore::new(store),
            referral,
            config,
            network,
            clock,
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn referral(&self) -> Option<&ReferralTracker<S, N>> {
        self.referral.as_ref()
    }

    pub fn dau(&self) -> &DauPolicy<S> {
        &self.dau
    }

    pub fn headers(&self) -> &CustomHeaderStore<S> {
        &self.headers
    }

    /// "App did finish launching". Returns `None` when referral tracking is
    /// disabled.
    pub async fn on_launch(&self, referral_hint: Option<&str>) -> Result<Option<LookupOutcome>> {
        let Some(referral) = &self.referral else {
            return Ok(None);
        };
        let outcome = referral.lookup(self.clock.now(), referral_hint).await?;
        Ok(Some(outcome))
    }

    /// Periodic tick: usage ping and referral retry step, independently.
    /// A failure in one half is reported as `Skipped` and never hides the
    /// other half's outcome.
    pub async fn on_tick(&self) -> TickReport {
        let now = self.clock.now();

        let ping = self.ping(now).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "usage ping skipped this cycle");
            PingReport::Skipped {
                reason: e.to_string(),
            }
        });

        let retry = match &self.referral {
            Some(referral) => Some(referral.check_finalization(now).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "referral check skipped this cycle");
                RetryOutcome::Skipped {
                    reason: e.to_string(),
                }
            })),
            None => None,
        };

        TickReport { ping, retry }
    }

    async fn ping(&self, now: chrono::DateTime<chrono::Utc>) -> Result<PingReport> {
        let Some(decision) = self.dau.evaluate(now)? else {
            return Ok(PingReport::NotDue);
        };

        let referral_code = match &self.referral {
            Some(referral) => referral.referral_code(now)?,
            None => None,
        };
        let url = decision.url(&self.config.stats_url, referral_code.as_deref())?;

        match self.network.send_ping(&url).await {
            Ok(()) => {
                tracing::debug!(%url, "usage ping sent");
                Ok(PingReport::Sent { url })
            }
            Err(error) => {
                tracing::warn!(error = %error, "usage ping failed");
                Ok(PingReport::Failed { url, error })
            }
        }
    }

    /// Add custom headers to an outgoing request.
    pub fn apply_headers(&self, request: reqwest::Request) -> Result<reqwest::Request> {
        Ok(self.headers.apply(request)?)
    }
}
