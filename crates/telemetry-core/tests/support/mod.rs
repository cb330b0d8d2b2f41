//! Shared helpers for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use telemetry_core::network::HeaderRulePayload;
use telemetry_core::storage::ReferralServiceConfig;
use telemetry_core::{
    CustomHeaderRule, FinalizationStatus, FixedClock, KeyValueStore, NetworkClient, NetworkError,
    ReferralData, TelemetryConfig, TelemetryScheduler,
};

/// Network double answering from scripted queues.
#[derive(Default)]
pub struct FakeNetwork {
    pub lookups: Mutex<VecDeque<Result<Option<ReferralData>, NetworkError>>>,
    pub checks: Mutex<VecDeque<Result<FinalizationStatus, NetworkError>>>,
    pub default_headers: Vec<CustomHeaderRule>,
    pub pings: Mutex<Vec<url::Url>>,
    pub checked: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn push_lookup(&self, result: Result<Option<ReferralData>, NetworkError>) {
        self.lookups.lock().unwrap().push_back(result);
    }

    pub fn push_check(&self, result: Result<FinalizationStatus, NetworkError>) {
        self.checks.lock().unwrap().push_back(result);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.lock().unwrap().len()
    }

    pub fn check_count(&self) -> usize {
        self.checked.lock().unwrap().len()
    }
}

impl NetworkClient for FakeNetwork {
    async fn send_ping(&self, url: &url::Url) -> Result<(), NetworkError> {
        self.pings.lock().unwrap().push(url.clone());
        Ok(())
    }

    async fn lookup_referral(
        &self,
        _referral_hint: Option<&str>,
    ) -> Result<Option<ReferralData>, NetworkError> {
        self.lookups.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn check_finalization(
        &self,
        download_id: &str,
    ) -> Result<FinalizationStatus, NetworkError> {
        self.checked.lock().unwrap().push(download_id.to_string());
        self.checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(FinalizationStatus::default()))
    }

    async fn fetch_custom_headers(&self) -> Result<Vec<CustomHeaderRule>, NetworkError> {
        Ok(self.default_headers.clone())
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
}

pub fn config() -> TelemetryConfig {
    TelemetryConfig {
        stats_url: "https://stats.example.com/1/usage/ios".into(),
        app_version: "1.2.3".into(),
        referral: ReferralServiceConfig {
            host: "https://referrals.example.com".into(),
            api_key: "key".into(),
        },
        ..TelemetryConfig::default()
    }
}

pub fn plain_referral(download_id: &str, code: &str) -> ReferralData {
    ReferralData {
        download_id: download_id.into(),
        referral_code: code.into(),
        offer_page: None,
        headers: None,
    }
}

pub fn extended_referral(offer_page: &str, domain: &str, field: &str, value: &str) -> ReferralData {
    ReferralData {
        download_id: "ext-1".into(),
        referral_code: "EXT".into(),
        offer_page: Some(offer_page.into()),
        headers: Some(vec![HeaderRulePayload {
            domains: vec![domain.into()],
            headers: [(field.to_string(), value.to_string())].into(),
        }]),
    }
}

pub fn inconclusive() -> Result<FinalizationStatus, NetworkError> {
    Ok(FinalizationStatus {
        initialized: Some(false),
    })
}

pub fn build<S: KeyValueStore>(
    store: Arc<S>,
    network: Arc<FakeNetwork>,
    clock: Arc<FixedClock>,
) -> TelemetryScheduler<S, FakeNetwork> {
    TelemetryScheduler::new(config(), store, network, clock)
}
