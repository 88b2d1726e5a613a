use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::BootArtifacts;
use crate::error::DomainError;
use crate::naming::validate_name;

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Boot,
    Reboot,
    Shutdown,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Boot => write!(f, "boot"),
            Operation::Reboot => write!(f, "reboot"),
            Operation::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arch {
    #[default]
    #[serde(rename = "X86")]
    X86,
    #[serde(rename = "ARM")]
    Arm,
    #[serde(rename = "Other")]
    Other,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X86 => write!(f, "X86"),
            Arch::Arm => write!(f, "ARM"),
            Arch::Other => write!(f, "Other"),
            Arch::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Pending,
    Running,
    Complete,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Running => write!(f, "running"),
            SessionState::Complete => write!(f, "complete"),
        }
    }
}

// ── Boot set ──────────────────────────────────────────────────────────────────

/// A subgroup within a session template binding a node selector to specific
/// boot artifacts and configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BootSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_list: Vec<String>,
    #[serde(default)]
    pub node_groups: Vec<String>,
    #[serde(default)]
    pub node_roles_groups: Vec<String>,
    #[serde(default)]
    pub arch: Arch,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub kernel_parameters: String,
    #[serde(default)]
    pub initrd: String,
    /// Image manifest path (object-store URL); resolved through IMS.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub cfs_configuration: String,
    #[serde(default)]
    pub rootfs_provider: String,
    #[serde(default)]
    pub rootfs_provider_passthrough: String,
}

impl BootSet {
    pub fn has_selector(&self) -> bool {
        !self.node_list.is_empty()
            || !self.node_groups.is_empty()
            || !self.node_roles_groups.is_empty()
    }

    pub fn boot_artifacts(&self) -> BootArtifacts {
        BootArtifacts {
            kernel: self.kernel.clone(),
            kernel_parameters: self.kernel_parameters.clone(),
            initrd: self.initrd.clone(),
            rootfs_provider: self.rootfs_provider.clone(),
            rootfs_provider_passthrough: self.rootfs_provider_passthrough.clone(),
        }
    }
}

// ── Session template ──────────────────────────────────────────────────────────

/// Describes one or more boot sets. Keyed by `<tenant>/<name>`; immutable
/// except by PATCH on the same tenant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionTemplate {
    pub name: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enable_cfs: bool,
    #[serde(default)]
    pub boot_sets: BTreeMap<String, BootSet>,
}

impl SessionTemplate {
    /// Structural validity: a legal name, at least one boot set, every boot
    /// set carrying at least one selector, boot-set names matching their map
    /// keys, and a resolvable architecture. Image existence is checked
    /// separately against IMS when `ims_images_must_exist` is set.
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_name(&self.name)?;
        if self.boot_sets.is_empty() {
            return Err(DomainError::InvalidTemplate {
                name: self.name.clone(),
                reason: "template has no boot sets".into(),
            });
        }
        for (key, bs) in &self.boot_sets {
            if !bs.name.is_empty() && bs.name != *key {
                return Err(DomainError::InvalidTemplate {
                    name: self.name.clone(),
                    reason: format!("boot set name '{}' does not match its key '{}'", bs.name, key),
                });
            }
            if !bs.has_selector() {
                return Err(DomainError::InvalidTemplate {
                    name: self.name.clone(),
                    reason: format!("boot set '{}' has no node/group/role selector", key),
                });
            }
            if bs.arch == Arch::Unknown {
                return Err(DomainError::InvalidTemplate {
                    name: self.name.clone(),
                    reason: format!("boot set '{}' has unresolvable architecture", key),
                });
            }
        }
        Ok(())
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: SessionState,
    #[serde(default)]
    pub error: Option<String>,
    /// Requested ids that could not be resolved and were skipped at setup.
    #[serde(default)]
    pub skipped_ids: Vec<String>,
}

/// An activation of a template with an operation against a (possibly
/// limited) set of nodes. Keyed by `<tenant>/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub tenant: String,
    pub template_name: String,
    pub operation: Operation,
    /// Optional selector restricting the template's effective nodes.
    #[serde(default)]
    pub limit: String,
    /// When true, writes land in `staged_state` instead of `desired_state`.
    #[serde(default)]
    pub stage: bool,
    #[serde(default)]
    pub include_disabled: bool,
    /// Ids resolved at session-setup time. Informational; the component
    /// records' `session` field is authoritative.
    #[serde(default)]
    pub components: Vec<String>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        template_name: impl Into<String>,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            tenant: tenant.into(),
            template_name: template_name.into(),
            operation,
            limit: String::new(),
            stage: false,
            include_disabled: false,
            components: Vec::new(),
            status: SessionStatus {
                start_time: now,
                end_time: None,
                status: SessionState::Pending,
                error: None,
                skipped_ids: Vec::new(),
            },
        }
    }
}
