use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ClientError;
use crate::http::{batches, CallPolicy, ServiceClient, MAX_IDS_PER_CALL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfsState {
    Configured,
    Pending,
    Failed,
    Unknown,
}

/// Per-id results of a batched desired-configuration write.
#[derive(Debug, Clone, Default)]
pub struct ConfigOutcome {
    pub accepted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[async_trait]
pub trait ConfigFramework: Send + Sync + 'static {
    async fn set_desired_config(
        &self,
        ids: &[String],
        config: &str,
        policy: CallPolicy,
    ) -> Result<ConfigOutcome, ClientError>;

    async fn config_status(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashMap<String, CfsState>, ClientError>;
}

pub struct HttpConfigFramework {
    inner: ServiceClient,
}

impl HttpConfigFramework {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("cfs", base, bearer),
        }
    }
}

#[async_trait]
impl ConfigFramework for HttpConfigFramework {
    async fn set_desired_config(
        &self,
        ids: &[String],
        config: &str,
        policy: CallPolicy,
    ) -> Result<ConfigOutcome, ClientError> {
        let mut outcome = ConfigOutcome::default();
        for chunk in batches(ids, MAX_IDS_PER_CALL) {
            let body = json!({
                "patch": { "desired_config": config, "enabled": true },
                "filters": { "ids": chunk.join(",") },
            });
            let resp = self.inner.patch_json("/components", &body, policy).await?;

            match resp["failed"].as_array() {
                Some(failures) => {
                    let mut failed_ids = HashMap::new();
                    for f in failures {
                        if let Some(id) = f["id"].as_str() {
                            let reason = f["error"].as_str().unwrap_or("configuration rejected");
                            failed_ids.insert(id.to_string(), reason.to_string());
                        }
                    }
                    for id in chunk {
                        match failed_ids.remove(&id) {
                            Some(reason) => outcome.failed.push((id, reason)),
                            None => outcome.accepted.push(id),
                        }
                    }
                }
                None => outcome.accepted.extend(chunk),
            }
        }
        Ok(outcome)
    }

    async fn config_status(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashMap<String, CfsState>, ClientError> {
        let mut out = HashMap::new();
        for chunk in batches(ids, MAX_IDS_PER_CALL) {
            let resp = self
                .inner
                .get_json(&format!("/components?ids={}", chunk.join(",")), policy)
                .await?;

            if let Some(entries) = resp.as_array() {
                for entry in entries {
                    let id = entry["id"].as_str().unwrap_or_default();
                    if id.is_empty() {
                        continue;
                    }
                    let state = match entry["configuration_status"].as_str() {
                        Some("configured") => CfsState::Configured,
                        Some("pending") => CfsState::Pending,
                        Some("failed") => CfsState::Failed,
                        _ => CfsState::Unknown,
                    };
                    out.insert(id.to_string(), state);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(2),
            max_response_bytes: 1 << 20,
        }
    }

    #[tokio::test]
    async fn desired_config_splits_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/components"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "failed": [ { "id": "x2", "error": "unknown component" } ]
            })))
            .mount(&server)
            .await;

        let cfs = HttpConfigFramework::new(server.uri(), None);
        let got = cfs
            .set_desired_config(&["x1".into(), "x2".into()], "cfg-1", policy())
            .await
            .unwrap();
        assert_eq!(got.accepted, vec!["x1"]);
        assert_eq!(got.failed.len(), 1);
    }

    #[tokio::test]
    async fn config_status_maps_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/components"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "x1", "configuration_status": "configured" },
                { "id": "x2", "configuration_status": "pending" },
            ])))
            .mount(&server)
            .await;

        let cfs = HttpConfigFramework::new(server.uri(), None);
        let got = cfs
            .config_status(&["x1".into(), "x2".into()], policy())
            .await
            .unwrap();
        assert_eq!(got["x1"], CfsState::Configured);
        assert_eq!(got["x2"], CfsState::Pending);
    }
}
