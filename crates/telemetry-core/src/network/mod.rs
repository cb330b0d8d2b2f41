//! Outbound calls made by the scheduler.
//!
//! Every operation resolves exactly once, with a value or a classified
//! [`NetworkError`]. The scheduler never talks to the outside world except
//! through [`NetworkClient`].

mod http;

pub use http::HttpNetworkClient;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;

use crate::error::NetworkError;
use crate::headers::CustomHeaderRule;

/// Referral record returned by the lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReferralData {
    pub download_id: String,
    pub referral_code: String,
    /// Present only for extended referrals.
    #[serde(default, rename = "offer_page_url")]
    pub offer_page: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<HeaderRulePayload>>,
}

impl ReferralData {
    pub fn is_extended(&self) -> bool {
        self.offer_page.is_some()
    }

    pub fn header_rules(&self) -> Vec<CustomHeaderRule> {
        self.headers
            .as_deref()
            .map(expand_header_payload)
            .unwrap_or_default()
    }
}

/// Server shape of one custom-header entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderRulePayload {
    pub domains: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

/// One stored rule per `(field, value)` of each payload entry, preserving
/// entry order.
pub fn expand_header_payload(payload: &[HeaderRulePayload]) -> Vec<CustomHeaderRule> {
    payload
        .iter()
        .flat_map(|entry| {
            entry.headers.iter().map(|(field, value)| CustomHeaderRule {
                domain_list: entry.domains.clone(),
                header_field: field.clone(),
                header_value: value.clone(),
            })
        })
        .collect()
}

/// Result of a finalization check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FinalizationStatus {
    #[serde(default, rename = "finalized", alias = "initialized")]
    pub initialized: Option<bool>,
}

/// External capability: perform one request and classify the result.
pub trait NetworkClient: Send + Sync {
    /// Whether a request has a chance of reaching the server.
    fn is_online(&self) -> bool {
        true
    }

    /// Send a usage ping. The response body is ignored.
    fn send_ping(&self, url: &url::Url) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Look up the referral for this install. `Ok(None)` means none exists.
    fn lookup_referral(
        &self,
        referral_hint: Option<&str>,
    ) -> impl Future<Output = Result<Option<ReferralData>, NetworkError>> + Send;

    /// Ask whether the referral behind `download_id` has been finalized.
    fn check_finalization(
        &self,
        download_id: &str,
    ) -> impl Future<Output = Result<FinalizationStatus, NetworkError>> + Send;

    /// Default header rules for installs without a referral.
    fn fetch_custom_headers(
        &self,
    ) -> impl Future<Output = Result<Vec<CustomHeaderRule>, NetworkError>> + Send;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted client for unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedNetwork {
        pub offline: bool,
        pub lookups: Mutex<VecDeque<Result<Option<ReferralData>, NetworkError>>>,
        pub checks: Mutex<VecDeque<Result<FinalizationStatus, NetworkError>>>,
        pub default_headers: Mutex<Vec<CustomHeaderRule>>,
        pub pings: Mutex<Vec<url::Url>>,
        pub check_calls: Mutex<Vec<String>>,
        pub fail_pings: bool,
        /// Suspend once inside each referral call, so overlapping calls can be observed.
        pub yield_first: bool,
    }

    impl ScriptedNetwork {
        pub fn with_lookup(result: Result<Option<ReferralData>, NetworkError>) -> Self {
            let net = Self::default();
            net.lookups.lock().unwrap().push_back(result);
            net
        }

        pub fn push_check(&self, result: Result<FinalizationStatus, NetworkError>) {
            self.checks.lock().unwrap().push_back(result);
        }

        pub fn check_count(&self) -> usize {
            self.check_calls.lock().unwrap().len()
        }
    }

    impl NetworkClient for ScriptedNetwork {
        fn is_online(&self) -> bool {
            !self.offline
        }

        async fn send_ping(&self, url: &url::Url) -> Result<(), NetworkError> {
            self.pings.lock().unwrap().push(url.clone());
            if self.fail_pings {
                Err(NetworkError::Transport("offline".into()))
            } else {
                Ok(())
            }
        }

        async fn lookup_referral(
            &self,
            _referral_hint: Option<&str>,
        ) -> Result<Option<ReferralData>, NetworkError> {
            if self.yield_first {
                tokio::task::yield_now().await;
            }
            self.lookups
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn check_finalization(
            &self,
            download_id: &str,
        ) -> Result<FinalizationStatus, NetworkError> {
            self.check_calls.lock().unwrap().push(download_id.to_string());
            if self.yield_first {
                tokio::task::yield_now().await;
            }
            self.checks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(FinalizationStatus::default()))
        }

        async fn fetch_custom_headers(&self) -> Result<Vec<CustomHeaderRule>, NetworkError> {
            Ok(self.default_headers.lock().unwrap().clone())
        }
    }
}
