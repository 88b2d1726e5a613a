use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::ClientError;
use crate::http::{batches, CallPolicy, ServiceClient, MAX_IDS_PER_CALL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    /// The power-control service could not determine the state; callers
    /// treat this as "leave the prior observation alone".
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    On,
    Off,
    ForceOff,
}

impl TransitionKind {
    fn wire_name(&self) -> &'static str {
        match self {
            TransitionKind::On => "On",
            TransitionKind::Off => "Soft-Off",
            TransitionKind::ForceOff => "Force-Off",
        }
    }
}

/// Per-node results of a batched power transition. Failures embedded in the
/// batch response are per-component errors, not call errors.
#[derive(Debug, Clone, Default)]
pub struct TransitionOutcome {
    pub accepted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[async_trait]
pub trait PowerControl: Send + Sync + 'static {
    async fn power_status(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashMap<String, PowerState>, ClientError>;

    async fn transition(
        &self,
        kind: TransitionKind,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<TransitionOutcome, ClientError>;
}

/// HTTP client for the power-control service.
pub struct HttpPowerControl {
    inner: ServiceClient,
}

impl HttpPowerControl {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("pcs", base, bearer),
        }
    }
}

#[async_trait]
impl PowerControl for HttpPowerControl {
    async fn power_status(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashMap<String, PowerState>, ClientError> {
        let mut out = HashMap::new();
        for chunk in batches(ids, MAX_IDS_PER_CALL) {
            let body = json!({ "xnames": chunk });
            let resp = self.inner.post_json("/power-status", &body, policy).await?;
            if let Some(entries) = resp["status"].as_array() {
                for entry in entries {
                    let id = entry["xname"].as_str().unwrap_or_default();
                    if id.is_empty() {
                        continue;
                    }
                    let state = match entry["powerState"].as_str() {
                        Some("on") => PowerState::On,
                        Some("off") => PowerState::Off,
                        _ => PowerState::Undefined,
                    };
                    out.insert(id.to_string(), state);
                }
            }
        }
        Ok(out)
    }

    async fn transition(
        &self,
        kind: TransitionKind,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<TransitionOutcome, ClientError> {
        let mut outcome = TransitionOutcome::default();
        for chunk in batches(ids, MAX_IDS_PER_CALL) {
            let body = json!({
                "operation": kind.wire_name(),
                "location": chunk.iter().map(|id| json!({ "xname": id })).collect::<Vec<_>>(),
            });
            let resp = self.inner.post_json("/transitions", &body, policy).await?;
            debug!(operation = kind.wire_name(), count = chunk.len(), "power transition requested");

            match resp["tasks"].as_array() {
                Some(tasks) => {
                    for task in tasks {
                        let id = task["xname"].as_str().unwrap_or_default().to_string();
                        if id.is_empty() {
                            continue;
                        }
                        match task["taskStatus"].as_str() {
                            Some("failed") => {
                                let reason = task["taskStatusDescription"]
                                    .as_str()
                                    .unwrap_or("power transition failed")
                                    .to_string();
                                outcome.failed.push((id, reason));
                            }
                            _ => outcome.accepted.push(id),
                        }
                    }
                }
                // No per-task breakdown: the whole batch was accepted.
                None => outcome.accepted.extend(chunk),
            }
        }
        Ok(outcome)
    }
}
