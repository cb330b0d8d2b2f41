//! reqwest-backed [`NetworkClient`] for the stats and referral services.

use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

use super::{
    expand_header_payload, FinalizationStatus, HeaderRulePayload, NetworkClient, ReferralData,
};
use crate::error::{ConfigError, NetworkError};
use crate::headers::CustomHeaderRule;
use crate::storage::ReferralServiceConfig;

const USER_AGENT: &str = concat!("telemetry-core/", env!("CARGO_PKG_VERSION"));
const PLATFORM: &str = "ios";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpNetworkClient {
    client: Client,
    referral: Option<ReferralServiceConfig>,
}

impl HttpNetworkClient {
    /// Client for pings only; referral calls fail with a transport error.
    pub fn new() -> Self {
        Self {
            client: build_client(),
            referral: None,
        }
    }

    /// Client that can also reach the referral service.
    pub fn with_referral(referral: ReferralServiceConfig) -> Result<Self, ConfigError> {
        referral.validate()?;
        Ok(Self {
            client: build_client(),
            referral: Some(referral),
        })
    }

    fn referral_endpoint(&self, path: &str) -> Result<(String, &str), NetworkError> {
        let referral = self
            .referral
            .as_ref()
            .ok_or_else(|| NetworkError::Transport("referral service not configured".into()))?;
        let url = format!("{}{}", referral.host.trim_end_matches('/'), path);
        Ok((url, referral.api_key.as_str()))
    }
}

impl Default for HttpNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl NetworkClient for HttpNetworkClient {
    async fn send_ping(&self, url: &url::Url) -> Result<(), NetworkError> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(NetworkError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn lookup_referral(
        &self,
        referral_hint: Option<&str>,
    ) -> Result<Option<ReferralData>, NetworkError> {
        let (url, api_key) = self.referral_endpoint("/promo/initialize/ios")?;
        let mut body = json!({ "api_key": api_key, "platform": PLATFORM });
        if let Some(code) = referral_hint {
            body["referral_code"] = json!(code);
        }

        let resp = self.client.post(&url).json(&body).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(NetworkError::Status(status.as_u16())),
            _ => {}
        }

        let value: serde_json::Value = resp.json().await?;
        let has_code = value["referral_code"]
            .as_str()
            .is_some_and(|code| !code.trim().is_empty());
        if !has_code {
            return Ok(None);
        }
        let data: ReferralData =
            serde_json::from_value(value).map_err(|e| NetworkError::Decode(e.to_string()))?;
        Ok(Some(data))
    }

    async fn check_finalization(
        &self,
        download_id: &str,
    ) -> Result<FinalizationStatus, NetworkError> {
        let (url, api_key) = self.referral_endpoint("/promo/activity")?;
        let body = json!({ "api_key": api_key, "download_id": download_id });

        let resp = self.client.put(&url).json(&body).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(NetworkError::DownloadIdNotFound),
            status if !status.is_success() => Err(NetworkError::Status(status.as_u16())),
            _ => Ok(resp.json::<FinalizationStatus>().await?),
        }
    }

    async fn fetch_custom_headers(&self) -> Result<Vec<CustomHeaderRule>, NetworkError> {
        let (url, _) = self.referral_endpoint("/promo/custom-headers")?;
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(NetworkError::Status(resp.status().as_u16()));
        }
        let payload: Vec<HeaderRulePayload> = resp.json().await?;
        Ok(expand_header_payload(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> HttpNetworkClient {
        HttpNetworkClient::with_referral(ReferralServiceConfig {
            host: server.url(),
            api_key: "test-key".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lookup_parses_referral() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/promo/initialize/ios")
            .match_body(Matcher::PartialJson(json!({
                "api_key": "test-key",
                "referral_code": "ABC123"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"download_id": "d-42", "referral_code": "ABC123"}"#)
            .create_async()
            .await;

        let data = client_for(&server)
            .lookup_referral(Some("ABC123"))
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(data.download_id, "d-42");
        assert!(!data.is_extended());
    }

    #[tokio::test]
    async fn lookup_without_code_means_no_referral() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/promo/initialize/ios")
            .with_status(200)
            .with_body(r#"{"download_id": "d-42", "referral_code": ""}"#)
            .create_async()
            .await;

        assert_eq!(client_for(&server).lookup_referral(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn finalization_404_is_download_id_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/promo/activity")
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&server).check_finalization("d-42").await.unwrap_err();
        assert_eq!(err, NetworkError::DownloadIdNotFound);
    }

    #[tokio::test]
    async fn finalization_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/promo/activity")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server).check_finalization("d-42").await.unwrap_err();
        assert_eq!(err, NetworkError::Status(503));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn finalization_reads_finalized_flag() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/promo/activity")
            .match_body(Matcher::PartialJson(json!({ "download_id": "d-42" })))
            .with_status(200)
            .with_body(r#"{"finalized": true}"#)
            .create_async()
            .await;

        let status = client_for(&server).check_finalization("d-42").await.unwrap();
        assert_eq!(status.initialized, Some(true));
    }

    #[tokio::test]
    async fn custom_headers_expand_payload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/promo/custom-headers")
            .with_status(200)
            .with_body(r#"[{"domains": ["example.com"], "headers": {"X-Test": "1"}}]"#)
            .create_async()
            .await;

        let rules = client_for(&server).fetch_custom_headers().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].header_field, "X-Test");
    }

    #[tokio::test]
    async fn ping_reports_http_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/1/usage/ios")
            .match_query(Matcher::UrlEncoded("first".into(), "true".into()))
            .with_status(500)
            .create_async()
            .await;

        let url = url::Url::parse(&format!("{}/1/usage/ios?first=true", server.url())).unwrap();
        let err = HttpNetworkClient::new().send_ping(&url).await.unwrap_err();
        assert_eq!(err, NetworkError::Status(500));
    }

    #[tokio::test]
    async fn referral_calls_fail_without_configuration() {
        let err = HttpNetworkClient::new().lookup_referral(None).await.unwrap_err();
        assert!(matches!(err, NetworkError::Transport(_)));
    }
}
