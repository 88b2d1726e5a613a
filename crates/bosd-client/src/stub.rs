use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bosd_domain::{Arch, BootArtifacts};
use serde_json::Value;

use crate::cfs::{CfsState, ConfigFramework, ConfigOutcome};
use crate::error::ClientError;
use crate::hsm::{HardwareState, NodeSummary};
use crate::http::CallPolicy;
use crate::ims::{Image, ImageService};
use crate::bss::BootScript;
use crate::objstore::ObjectStore;
use crate::pcs::{PowerControl, PowerState, TransitionKind, TransitionOutcome};
use crate::tapms::TenantService;

#[derive(Debug, Default)]
struct StubState {
    nodes: Vec<NodeSummary>,
    groups: HashMap<String, Vec<String>>,
    locked: HashSet<String>,

    power: HashMap<String, PowerState>,
    /// Per-id failure injection: any transition against these ids comes back
    /// failed in the batch response.
    transition_failures: HashMap<String, String>,
    /// Ids whose graceful power-off is accepted but has no effect, for
    /// exercising the forceful escalation path.
    stuck_on_graceful: HashSet<String>,

    cfs_states: HashMap<String, CfsState>,
    cfs_failures: HashMap<String, String>,
    desired_config_log: Vec<(Vec<String>, String)>,

    images: HashMap<String, Image>,
    image_tags: Vec<(String, String, String)>,
    manifests: HashMap<String, Value>,

    tenant_owned: HashMap<String, HashSet<String>>,

    boot_params_log: Vec<(Vec<String>, String)>,

    /// Number of calls that arrived with an empty id list. Operators must
    /// short-circuit before the client layer, so tests assert this stays 0.
    empty_calls: u32,
}

/// In-process fakes for every external collaborator, sharing one scriptable
/// state. Used by operator tests and by `--stub-clients` dev mode, where the
/// service runs end-to-end without any of its collaborators present.
#[derive(Debug, Clone, Default)]
pub struct StubClients {
    state: Arc<Mutex<StubState>>,
}

impl StubClients {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ───────────────────────────────────────────────────────────────

    pub fn add_node(&self, id: &str, arch: Arch, enabled: bool, role: &str) {
        let mut s = self.state.lock().unwrap();
        s.nodes.push(NodeSummary {
            id: id.to_string(),
            arch,
            enabled,
            role: role.to_string(),
        });
        s.power.entry(id.to_string()).or_insert(PowerState::Off);
    }

    pub fn set_group(&self, name: &str, members: &[&str]) {
        self.state.lock().unwrap().groups.insert(
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn set_locked(&self, id: &str) {
        self.state.lock().unwrap().locked.insert(id.to_string());
    }

    pub fn set_power(&self, id: &str, state: PowerState) {
        self.state.lock().unwrap().power.insert(id.to_string(), state);
    }

    pub fn fail_transitions(&self, id: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .transition_failures
            .insert(id.to_string(), reason.to_string());
    }

    pub fn stick_on_graceful_off(&self, id: &str) {
        self.state.lock().unwrap().stuck_on_graceful.insert(id.to_string());
    }

    pub fn set_cfs_state(&self, id: &str, state: CfsState) {
        self.state.lock().unwrap().cfs_states.insert(id.to_string(), state);
    }

    pub fn fail_cfs(&self, id: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .cfs_failures
            .insert(id.to_string(), reason.to_string());
    }

    pub fn add_image(&self, image: Image) {
        self.state.lock().unwrap().images.insert(image.id.clone(), image);
    }

    pub fn set_manifest(&self, url: &str, manifest: Value) {
        self.state.lock().unwrap().manifests.insert(url.to_string(), manifest);
    }

    pub fn set_tenant_owned(&self, tenant: &str, ids: &[&str]) {
        self.state.lock().unwrap().tenant_owned.insert(
            tenant.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn power_of(&self, id: &str) -> Option<PowerState> {
        self.state.lock().unwrap().power.get(id).copied()
    }

    pub fn boot_params_log(&self) -> Vec<(Vec<String>, String)> {
        self.state.lock().unwrap().boot_params_log.clone()
    }

    pub fn desired_config_log(&self) -> Vec<(Vec<String>, String)> {
        self.state.lock().unwrap().desired_config_log.clone()
    }

    pub fn image_tags(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().image_tags.clone()
    }

    pub fn empty_calls(&self) -> u32 {
        self.state.lock().unwrap().empty_calls
    }

    fn note_empty(&self, ids: &[String]) {
        if ids.is_empty() {
            self.state.lock().unwrap().empty_calls += 1;
        }
    }
}

#[async_trait]
impl PowerControl for StubClients {
    async fn power_status(
        &self,
        ids: &[String],
        _policy: CallPolicy,
    ) -> Result<HashMap<String, PowerState>, ClientError> {
        self.note_empty(ids);
        let s = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| s.power.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }

    async fn transition(
        &self,
        kind: TransitionKind,
        ids: &[String],
        _policy: CallPolicy,
    ) -> Result<TransitionOutcome, ClientError> {
        self.note_empty(ids);
        let mut s = self.state.lock().unwrap();
        let mut outcome = TransitionOutcome::default();
        for id in ids {
            if let Some(reason) = s.transition_failures.get(id) {
                outcome.failed.push((id.clone(), reason.clone()));
                continue;
            }
            match kind {
                TransitionKind::On => {
                    s.power.insert(id.clone(), PowerState::On);
                }
                TransitionKind::Off => {
                    if !s.stuck_on_graceful.contains(id) {
                        s.power.insert(id.clone(), PowerState::Off);
                    }
                }
                TransitionKind::ForceOff => {
                    s.power.insert(id.clone(), PowerState::Off);
                }
            }
            outcome.accepted.push(id.clone());
        }
        Ok(outcome)
    }
}

#[async_trait]
impl HardwareState for StubClients {
    async fn list_nodes(&self, _policy: CallPolicy) -> Result<Vec<NodeSummary>, ClientError> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn expand_groups(
        &self,
        names: &[String],
        _policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError> {
        self.note_empty(names);
        let s = self.state.lock().unwrap();
        Ok(names
            .iter()
            .flat_map(|n| s.groups.get(n).cloned().unwrap_or_default())
            .collect())
    }

    async fn expand_roles(
        &self,
        roles: &[String],
        _policy: CallPolicy,
    ) -> Result<Vec<String>, ClientError> {
        self.note_empty(roles);
        let s = self.state.lock().unwrap();
        Ok(s.nodes
            .iter()
            .filter(|n| roles.contains(&n.role))
            .map(|n| n.id.clone())
            .collect())
    }

    async fn locked_nodes(
        &self,
        ids: &[String],
        _policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError> {
        self.note_empty(ids);
        let s = self.state.lock().unwrap();
        Ok(ids.iter().filter(|id| s.locked.contains(*id)).cloned().collect())
    }
}

#[async_trait]
impl BootScript for StubClients {
    async fn set_boot_params(
        &self,
        ids: &[String],
        _artifacts: &BootArtifacts,
        referral_token: &str,
        _policy: CallPolicy,
    ) -> Result<(), ClientError> {
        self.note_empty(ids);
        self.state
            .lock()
            .unwrap()
            .boot_params_log
            .push((ids.to_vec(), referral_token.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ImageService for StubClients {
    async fn get_image(
        &self,
        id: &str,
        _policy: CallPolicy,
    ) -> Result<Option<Image>, ClientError> {
        Ok(self.state.lock().unwrap().images.get(id).cloned())
    }

    async fn tag_image(
        &self,
        id: &str,
        key: &str,
        value: &str,
        _policy: CallPolicy,
    ) -> Result<(), ClientError> {
        self.state.lock().unwrap().image_tags.push((
            id.to_string(),
            key.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StubClients {
    async fn fetch_manifest(&self, url: &str, _policy: CallPolicy) -> Result<Value, ClientError> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(url)
            .cloned()
            .ok_or(ClientError::Status {
                service: "s3",
                status: 404,
                message: format!("no manifest at {}", url),
            })
    }
}

#[async_trait]
impl ConfigFramework for StubClients {
    async fn set_desired_config(
        &self,
        ids: &[String],
        config: &str,
        _policy: CallPolicy,
    ) -> Result<ConfigOutcome, ClientError> {
        self.note_empty(ids);
        let mut s = self.state.lock().unwrap();
        s.desired_config_log.push((ids.to_vec(), config.to_string()));
        let mut outcome = ConfigOutcome::default();
        for id in ids {
            match s.cfs_failures.get(id) {
                Some(reason) => outcome.failed.push((id.clone(), reason.clone())),
                None => outcome.accepted.push(id.clone()),
            }
        }
        Ok(outcome)
    }

    async fn config_status(
        &self,
        ids: &[String],
        _policy: CallPolicy,
    ) -> Result<HashMap<String, CfsState>, ClientError> {
        self.note_empty(ids);
        let s = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    s.cfs_states.get(id).copied().unwrap_or(CfsState::Unknown),
                )
            })
            .collect())
    }
}

#[async_trait]
impl TenantService for StubClients {
    async fn owned_nodes(
        &self,
        tenant: &str,
        _policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tenant_owned
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }
}
