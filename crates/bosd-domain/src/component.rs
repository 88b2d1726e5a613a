use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Boot artifacts ────────────────────────────────────────────────────────────

/// The identity of a booted image: kernel, initrd, kernel parameters and the
/// rootfs provider. Two components booted with equal artifacts are running
/// the same thing as far as bosd is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootArtifacts {
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub kernel_parameters: String,
    #[serde(default)]
    pub initrd: String,
    #[serde(default)]
    pub rootfs_provider: String,
    #[serde(default)]
    pub rootfs_provider_passthrough: String,
}

impl BootArtifacts {
    /// True when no boot target is declared at all.
    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty() && self.initrd.is_empty()
    }
}

// ── Component state triplet ───────────────────────────────────────────────────

/// A declared boot goal: artifacts plus the CFS configuration to apply after
/// boot and the BSS referral token minted for this goal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentState {
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    #[serde(default)]
    pub configuration: String,
    #[serde(default)]
    pub bss_token: String,
}

impl ComponentState {
    pub fn is_empty(&self) -> bool {
        self.boot_artifacts.is_empty() && self.configuration.is_empty()
    }
}

/// The last observed booted identity of a node, stamped when observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentActualState {
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    #[serde(default)]
    pub configuration: String,
    #[serde(default)]
    pub bss_token: String,
    pub last_updated: DateTime<Utc>,
}

// ── Last action ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PowerOn,
    PowerOffGracefully,
    PowerOffForcefully,
    ShutdownPending,
    #[default]
    None,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::PowerOn => "power_on",
            ActionKind::PowerOffGracefully => "power_off_gracefully",
            ActionKind::PowerOffForcefully => "power_off_forcefully",
            ActionKind::ShutdownPending => "shutdown_pending",
            ActionKind::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// Record of the most recent reconciliation action taken against a component.
///
/// `num_attempts` never exceeds the retry limit before `failed` is set; the
/// status operator enforces that budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAction {
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub num_attempts: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub failed: bool,
}

impl Default for LastAction {
    fn default() -> Self {
        Self {
            action: ActionKind::None,
            num_attempts: 0,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            failed: false,
        }
    }
}

impl LastAction {
    /// Stamp a fresh action, bumping the attempt counter when the action kind
    /// repeats and resetting it when the kind changes.
    pub fn record(&mut self, action: ActionKind, now: DateTime<Utc>) {
        if self.action == action {
            self.num_attempts += 1;
        } else {
            self.action = action;
            self.num_attempts = 1;
        }
        self.last_updated = now;
        self.failed = false;
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    None,
    PoweringOn,
    PoweringOff,
    Configuring,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::None => "none",
            Phase::PoweringOn => "powering_on",
            Phase::PoweringOff => "powering_off",
            Phase::Configuring => "configuring",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusValue {
    #[default]
    Stable,
    On,
    Off,
    PowerOnPending,
    PowerOnCalled,
    PowerOffPending,
    PowerOffGracefullyCalled,
    PowerOffForcefullyCalled,
    Configuring,
    Failed,
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusValue::Stable => "stable",
            StatusValue::On => "on",
            StatusValue::Off => "off",
            StatusValue::PowerOnPending => "power_on_pending",
            StatusValue::PowerOnCalled => "power_on_called",
            StatusValue::PowerOffPending => "power_off_pending",
            StatusValue::PowerOffGracefullyCalled => "power_off_gracefully_called",
            StatusValue::PowerOffForcefullyCalled => "power_off_forcefully_called",
            StatusValue::Configuring => "configuring",
            StatusValue::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Derived status block. `status` is recomputed from `(phase, last_action)`
/// by [`derive_status`]; `status_override` wins when set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub status: StatusValue,
    #[serde(default)]
    pub status_override: Option<StatusValue>,
}

impl ComponentStatus {
    pub fn effective(&self) -> StatusValue {
        self.status_override.unwrap_or(self.status)
    }
}

/// Map a component's phase and last action onto the fine-grained status value.
///
/// This is the glue that makes the operator bank coherent: a component in the
/// powering-off phase with no power-off action yet shows `power_off_pending`,
/// which is exactly what the graceful power-off operator filters on.
pub fn derive_status(phase: Phase, last_action: &LastAction) -> StatusValue {
    if last_action.failed {
        return StatusValue::Failed;
    }
    match phase {
        Phase::None => StatusValue::Stable,
        Phase::PoweringOn => match last_action.action {
            ActionKind::PowerOn => StatusValue::PowerOnCalled,
            _ => StatusValue::PowerOnPending,
        },
        Phase::PoweringOff => match last_action.action {
            ActionKind::PowerOffGracefully => StatusValue::PowerOffGracefullyCalled,
            ActionKind::PowerOffForcefully => StatusValue::PowerOffForcefullyCalled,
            _ => StatusValue::PowerOffPending,
        },
        Phase::Configuring => StatusValue::Configuring,
    }
}

// ── Event stats ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventStats {
    #[serde(default)]
    pub power_on_attempts: u32,
    #[serde(default)]
    pub power_off_graceful_attempts: u32,
    #[serde(default)]
    pub power_off_forceful_attempts: u32,
}

// ── Component ─────────────────────────────────────────────────────────────────

/// The per-node reconciliation record. Keyed in the store by
/// `<tenant>/<id>`; the empty tenant is the untenanted bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub desired_state: ComponentState,
    #[serde(default)]
    pub actual_state: Option<ComponentActualState>,
    #[serde(default)]
    pub staged_state: ComponentState,
    #[serde(default)]
    pub last_action: LastAction,
    #[serde(default)]
    pub status: ComponentStatus,
    /// Most recent reconciliation error text; empty when healthy.
    #[serde(default)]
    pub error: String,
    /// Name of the session currently owning this component, or empty.
    #[serde(default)]
    pub session: String,
    /// Per-component retry limit override; falls back to the options default.
    #[serde(default)]
    pub retry_policy: Option<u32>,
    #[serde(default)]
    pub event_stats: EventStats,
}

impl Component {
    pub fn new(id: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            enabled: true,
            desired_state: ComponentState::default(),
            actual_state: None,
            staged_state: ComponentState::default(),
            last_action: LastAction::default(),
            status: ComponentStatus::default(),
            error: String::new(),
            session: String::new(),
            retry_policy: None,
            event_stats: EventStats::default(),
        }
    }

    pub fn retry_limit(&self, default: u32) -> u32 {
        self.retry_policy.unwrap_or(default)
    }

    /// True when the observed booted identity equals the declared one.
    pub fn boot_artifacts_match(&self) -> bool {
        self.actual_state
            .as_ref()
            .map(|a| a.boot_artifacts == self.desired_state.boot_artifacts)
            .unwrap_or(false)
    }

    /// Components that have exhausted their retry budget are skipped by every
    /// operator except the status operator.
    pub fn retries_exhausted(&self, default_limit: u32) -> bool {
        self.last_action.failed && self.last_action.num_attempts >= self.retry_limit(default_limit)
    }
}
