use std::collections::HashSet;

use async_trait::async_trait;
use bosd_domain::Arch;
use serde_json::json;

use crate::error::ClientError;
use crate::http::{CallPolicy, ServiceClient};

/// One node as the hardware state manager reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: String,
    pub arch: Arch,
    pub enabled: bool,
    pub role: String,
}

#[async_trait]
pub trait HardwareState: Send + Sync + 'static {
    /// Full node inventory; consumed by the discovery operator.
    async fn list_nodes(&self, policy: CallPolicy) -> Result<Vec<NodeSummary>, ClientError>;

    /// Resolve group names into member node ids.
    async fn expand_groups(
        &self,
        names: &[String],
        policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError>;

    /// Resolve role names into node ids carrying that role.
    async fn expand_roles(
        &self,
        roles: &[String],
        policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError>;

    /// Which of `ids` are currently locked by the hardware state manager.
    async fn locked_nodes(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError>;
}

pub struct HttpHardwareState {
    inner: ServiceClient,
}

impl HttpHardwareState {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("hsm", base, bearer),
        }
    }
}

fn parse_arch(s: Option<&str>) -> Arch {
    match s {
        Some("X86") => Arch::X86,
        Some("ARM") => Arch::Arm,
        Some("Other") => Arch::Other,
        _ => Arch::Unknown,
    }
}

#[async_trait]
impl HardwareState for HttpHardwareState {
    async fn list_nodes(&self, policy: CallPolicy) -> Result<Vec<NodeSummary>, ClientError> {
        let resp = self
            .inner
            .get_json("/State/Components?type=Node", policy)
            .await?;
        let mut nodes = Vec::new();
        if let Some(entries) = resp["Components"].as_array() {
            for entry in entries {
                let id = entry["ID"].as_str().unwrap_or_default();
                if id.is_empty() {
                    continue;
                }
                nodes.push(NodeSummary {
                    id: id.to_string(),
                    arch: parse_arch(entry["Arch"].as_str()),
                    enabled: entry["Enabled"].as_bool().unwrap_or(true),
                    role: entry["Role"].as_str().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(nodes)
    }

    async fn expand_groups(
        &self,
        names: &[String],
        policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError> {
        let mut members = Vec::new();
        for name in names {
            let resp = self
                .inner
                .get_json(&format!("/groups/{}", name), policy)
                .await;
            let resp = match resp {
                Ok(v) => v,
                // An unknown group contributes nothing rather than failing
                // the whole expansion.
                Err(ClientError::Status { status: 404, .. }) => continue,
                Err(e) => return Err(e),
            };
            if let Some(ids) = resp["members"]["ids"].as_array() {
                members.extend(ids.iter().filter_map(|v| v.as_str()).map(String::from));
            }
        }
        Ok(members)
    }

    async fn expand_roles(
        &self,
        roles: &[String],
        policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError> {
        let mut members = Vec::new();
        for role in roles {
            let resp = self
                .inner
                .get_json(&format!("/State/Components?type=Node&role={}", role), policy)
                .await?;
            if let Some(entries) = resp["Components"].as_array() {
                members.extend(
                    entries
                        .iter()
                        .filter_map(|e| e["ID"].as_str())
                        .map(String::from),
                );
            }
        }
        Ok(members)
    }

    async fn locked_nodes(
        &self,
        ids: &[String],
        policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError> {
        let body = json!({ "ComponentIDs": ids });
        let resp = self.inner.post_json("/locks/status", &body, policy).await?;
        let mut locked = HashSet::new();
        if let Some(entries) = resp["Components"].as_array() {
            for entry in entries {
                if entry["Locked"].as_bool().unwrap_or(false) {
                    if let Some(id) = entry["ID"].as_str() {
                        locked.insert(id.to_string());
                    }
                }
            }
        }
        Ok(locked)
    }
}
