//! Domain-scoped custom HTTP headers.
//!
//! Rules are replaced as a whole set whenever the referral service supplies
//! new ones; there is no per-rule update and no expiry.

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;
use crate::storage::{keys, KeyValueStore, KvWrite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeaderRule {
    pub domain_list: Vec<String>,
    pub header_field: String,
    pub header_value: String,
}

impl CustomHeaderRule {
    /// First domain of this rule contained in `host`, if any.
    pub fn matching_domain(&self, host: &str) -> Option<&str> {
        self.domain_list
            .iter()
            .map(String::as_str)
            .find(|domain| !domain.is_empty() && host.contains(domain))
    }
}

pub struct CustomHeaderStore<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> CustomHeaderStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Stored rules in order. A malformed record reads as no rules.
    pub fn rules(&self) -> Result<Vec<CustomHeaderRule>, StoreError> {
        match self.store.get_json(keys::CUSTOM_HEADER_RULES) {
            Ok(rules) => Ok(rules.unwrap_or_default()),
            Err(StoreError::Malformed { key, message }) => {
                tracing::warn!(%key, %message, "discarding malformed custom header rules");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn replace_all(&self, rules: &[CustomHeaderRule]) -> Result<(), StoreError> {
        self.store
            .write_batch(&[Self::replace_write(rules)?])?;
        tracing::debug!(count = rules.len(), "replaced custom header rules");
        Ok(())
    }

    /// Batch entry replacing the rule set, for callers composing a larger
    /// atomic write.
    pub fn replace_write(rules: &[CustomHeaderRule]) -> Result<KvWrite, StoreError> {
        KvWrite::set_json(keys::CUSTOM_HEADER_RULES, rules)
    }

    /// Add every matching rule's header to `request`.
    pub fn apply(&self, request: reqwest::Request) -> Result<reqwest::Request, StoreError> {
        let rules = self.rules()?;
        Ok(apply_rules(&rules, request))
    }
}

/// Each rule contributes at most one header: its own, when the request host
/// contains any of its domains.
pub fn apply_rules(rules: &[CustomHeaderRule], mut request: reqwest::Request) -> reqwest::Request {
    let Some(host) = request.url().host_str().map(str::to_owned) else {
        return request;
    };

    for rule in rules {
        if rule.matching_domain(&host).is_none() {
            continue;
        }
        let name = HeaderName::from_bytes(rule.header_field.as_bytes());
        let value = HeaderValue::from_str(&rule.header_value);
        match (name, value) {
            (Ok(name), Ok(value)) => {
                request.headers_mut().append(name, value);
            }
            _ => {
                tracing::warn!(field = %rule.header_field, "skipping invalid custom header rule");
            }
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use reqwest::{Method, Request};

    fn request(url: &str) -> Request {
        Request::new(Method::GET, url::Url::parse(url).unwrap())
    }

    fn rule(domains: &[&str], field: &str, value: &str) -> CustomHeaderRule {
        CustomHeaderRule {
            domain_list: domains.iter().map(|d| d.to_string()).collect(),
            header_field: field.into(),
            header_value: value.into(),
        }
    }

    #[test]
    fn subdomain_request_receives_header() {
        let rules = vec![rule(&["example.com"], "X-Test", "1")];
        let req = apply_rules(&rules, request("https://www.example.com/path"));
        assert_eq!(req.headers().get("X-Test").unwrap(), "1");
    }

    #[test]
    fn other_domain_is_left_alone() {
        let rules = vec![rule(&["example.com"], "X-Test", "1")];
        let req = apply_rules(&rules, request("https://example.org/"));
        assert!(req.headers().is_empty());
    }

    #[test]
    fn each_rule_contributes_once() {
        let rules = vec![
            rule(&["example.com", "www.example.com"], "X-One", "1"),
            rule(&["example"], "X-Two", "2"),
            rule(&["other.com"], "X-Three", "3"),
        ];
        let req = apply_rules(&rules, request("https://www.example.com/"));
        assert_eq!(req.headers().get_all("X-One").iter().count(), 1);
        assert_eq!(req.headers().get("X-Two").unwrap(), "2");
        assert!(req.headers().get("X-Three").is_none());
    }

    #[test]
    fn invalid_header_name_is_skipped() {
        let rules = vec![
            rule(&["example.com"], "Bad Header", "1"),
            rule(&["example.com"], "X-Good", "ok"),
        ];
        let req = apply_rules(&rules, request("https://example.com/"));
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.headers().get("X-Good").unwrap(), "ok");
    }

    #[test]
    fn store_replaces_whole_set() {
        let store = CustomHeaderStore::new(Arc::new(MemoryStore::new()));
        assert!(store.rules().unwrap().is_empty());

        store
            .replace_all(&[rule(&["a.com"], "X-A", "a"), rule(&["b.com"], "X-B", "b")])
            .unwrap();
        store.replace_all(&[rule(&["c.com"], "X-C", "c")]).unwrap();

        let rules = store.rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].header_field, "X-C");
    }

    #[test]
    fn no_rules_leaves_request_unmodified() {
        let store = CustomHeaderStore::new(Arc::new(MemoryStore::new()));
        let req = store.apply(request("https://www.example.com/")).unwrap();
        assert!(req.headers().is_empty());
    }

    #[test]
    fn malformed_rules_read_as_empty() {
        let backing = Arc::new(MemoryStore::new());
        backing.set_raw(keys::CUSTOM_HEADER_RULES, "{not json").unwrap();
        let store = CustomHeaderStore::new(backing);
        assert!(store.rules().unwrap().is_empty());
    }
}
