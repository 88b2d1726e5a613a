use serde::{Deserialize, Serialize};

/// The mutable service options record, merged over typed defaults.
///
/// Stored as a single hash under `options/global`; operators take a snapshot
/// once per iteration and pass it by value into their steps, so a PATCH to
/// the record takes effect on the next loop without restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsSnapshot {
    /// Seconds each operator sleeps between iterations.
    pub polling_frequency_secs: u64,
    /// Upper bound on the number of components handed to one external call.
    pub max_component_batch_size: usize,
    /// Retry limit applied to components without a `retry_policy` of their own.
    pub default_retry_policy: u32,
    /// Disable components once their owning session completes.
    pub disable_components_on_completion: bool,
    /// Completed sessions are deleted after this grace period.
    pub cleanup_completed_session_ttl_hours: u32,
    /// Actual state older than this is considered stale and cleared.
    pub component_actual_state_ttl_hours: u32,
    /// A called power-on that has not produced an observed power change
    /// within this window is returned to pending for another attempt.
    pub max_power_on_wait_time_secs: u64,
    /// Escalation window from graceful to forceful power-off.
    pub max_power_off_wait_time_secs: u64,

    pub pcs_read_timeout_secs: u64,
    pub hsm_read_timeout_secs: u64,
    pub bss_read_timeout_secs: u64,
    pub ims_read_timeout_secs: u64,
    pub cfs_read_timeout_secs: u64,

    /// Abort manifest decoding past this many bytes.
    pub max_manifest_bytes: usize,
    pub logging_level: String,

    pub reject_nids: bool,
    pub session_limit_required: bool,
    pub ims_errors_fatal: bool,
    pub ims_images_must_exist: bool,
}

impl Default for OptionsSnapshot {
    fn default() -> Self {
        Self {
            polling_frequency_secs: 15,
            max_component_batch_size: 1000,
            default_retry_policy: 3,
            disable_components_on_completion: false,
            cleanup_completed_session_ttl_hours: 24,
            component_actual_state_ttl_hours: 4,
            max_power_on_wait_time_secs: 120,
            max_power_off_wait_time_secs: 300,
            pcs_read_timeout_secs: 10,
            hsm_read_timeout_secs: 10,
            bss_read_timeout_secs: 10,
            ims_read_timeout_secs: 10,
            cfs_read_timeout_secs: 20,
            max_manifest_bytes: 1024 * 1024,
            logging_level: "info".into(),
            reject_nids: false,
            session_limit_required: false,
            ims_errors_fatal: false,
            ims_images_must_exist: false,
        }
    }
}
