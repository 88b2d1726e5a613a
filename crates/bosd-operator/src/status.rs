use async_trait::async_trait;
use bosd_client::{CfsState, PowerState};
use bosd_domain::{
    derive_status, ActionKind, Component, LastAction, OptionsSnapshot, Phase, StatusValue,
};
use bosd_store::record_key;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::env::Env;
use crate::framework::{ComponentOperator, ComponentUpdate};
use crate::options::{cfs_policy, pcs_policy};

/// What the external services reported for one component in this pass.
#[derive(Debug, Clone, Copy)]
pub struct Observed {
    pub power: PowerState,
    pub cfs: Option<CfsState>,
}

/// Reconciles every enabled component's stored status with observed
/// reality: power from the power-control service, configuration state from
/// the configuration framework, booted identity from the node-reported
/// `actual_state`. This is the only operator that touches components whose
/// retry budget is exhausted — it is the one that marks them failed.
pub struct StatusOperator;

#[async_trait]
impl ComponentOperator for StatusOperator {
    fn name(&self) -> &'static str {
        "status"
    }

    fn filter(&self, c: &Component, _opts: &OptionsSnapshot) -> bool {
        c.enabled
    }

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        let power = match env.clients.power.power_status(&ids, pcs_policy(opts)).await {
            Ok(p) => p,
            // No observation this pass; prior statuses stand.
            Err(_) => return Vec::new(),
        };

        let config_ids: Vec<String> = batch
            .iter()
            .filter(|c| !c.desired_state.configuration.is_empty())
            .map(|c| c.id.clone())
            .collect();
        let cfs = if config_ids.is_empty() {
            Default::default()
        } else {
            env.clients
                .config
                .config_status(&config_ids, cfs_policy(opts))
                .await
                .unwrap_or_default()
        };

        let now = Utc::now();
        let mut updates = Vec::new();
        for c in batch {
            // A component the power service did not answer for keeps its
            // prior status rather than being clobbered to unknown.
            let power_state = match power.get(&c.id) {
                Some(PowerState::Undefined) | None => continue,
                Some(p) => *p,
            };
            let observed = Observed {
                power: power_state,
                cfs: cfs.get(&c.id).copied(),
            };
            let opts = opts.clone();
            updates.push(ComponentUpdate::new(
                record_key(&c.tenant, &c.id),
                move |c: Component| evaluate(c, observed, &opts, now),
            ));
        }
        updates
    }
}

fn overdue(last_action: &LastAction, window_secs: u64, now: DateTime<Utc>) -> bool {
    now - last_action.last_updated > ChronoDuration::seconds(window_secs as i64)
}

/// The status transition ladder. Pure: the returned component is a function
/// of the snapshot and the observation only, so the store may replay it.
pub fn evaluate(
    mut c: Component,
    observed: Observed,
    opts: &OptionsSnapshot,
    now: DateTime<Utc>,
) -> Component {
    let limit = c.retry_limit(opts.default_retry_policy);

    match observed.power {
        PowerState::Off => {
            // Nothing is booted on a powered-off node.
            c.actual_state = None;

            if c.desired_state.boot_artifacts.is_empty() {
                // Goal reached: off is what was asked for.
                c.status.phase = Phase::None;
                c.status.status = StatusValue::Off;
                c.last_action = LastAction::default();
                c.error = String::new();
            } else {
                c.status.phase = Phase::PoweringOn;
                if c.last_action.action == ActionKind::PowerOn {
                    if overdue(&c.last_action, opts.max_power_on_wait_time_secs, now) {
                        if c.last_action.num_attempts >= limit {
                            c.last_action.failed = true;
                            c.status.status = StatusValue::Failed;
                            c.error = "node failed to power on within the retry budget".into();
                        } else {
                            // Hand it back to the power-on operator with its
                            // attempt count intact.
                            c.status.status = StatusValue::PowerOnPending;
                        }
                    } else {
                        c.status.status = StatusValue::PowerOnCalled;
                    }
                } else {
                    c.status.status = StatusValue::PowerOnPending;
                }
            }
        }

        PowerState::On if c.desired_state.boot_artifacts.is_empty() => {
            c.status.phase = Phase::PoweringOff;
            if c.last_action.action == ActionKind::PowerOffForcefully
                && overdue(&c.last_action, opts.max_power_off_wait_time_secs, now)
                && c.last_action.num_attempts >= limit
            {
                c.last_action.failed = true;
                c.status.status = StatusValue::Failed;
                c.error = "node failed to power off within the retry budget".into();
            } else {
                c.status.status = derive_status(c.status.phase, &c.last_action);
            }
        }

        PowerState::On => match &c.actual_state {
            Some(actual) if actual.boot_artifacts == c.desired_state.boot_artifacts => {
                let configured = c.desired_state.configuration.is_empty()
                    || observed.cfs == Some(CfsState::Configured);
                if configured {
                    // The declared and observed identities agree and
                    // configuration is settled: the component is stable.
                    c.status.phase = Phase::None;
                    c.status.status = StatusValue::Stable;
                    c.last_action = LastAction::default();
                    c.error = String::new();
                } else {
                    c.status.phase = Phase::Configuring;
                    c.status.status = StatusValue::Configuring;
                    if observed.cfs == Some(CfsState::Failed) {
                        c.error = "configuration framework reported failure".into();
                    }
                }
            }
            Some(_) => {
                // The last boot produced the wrong identity.
                if c.last_action.num_attempts >= limit {
                    c.last_action.failed = true;
                    c.status.status = StatusValue::Failed;
                    c.error = "node booted artifacts that do not match its desired state".into();
                } else {
                    // Power-cycle and try again.
                    c.status.phase = Phase::PoweringOff;
                    c.status.status = derive_status(c.status.phase, &c.last_action);
                }
            }
            None => {
                if c.last_action.action == ActionKind::PowerOn {
                    c.status.phase = Phase::PoweringOn;
                    if overdue(&c.last_action, opts.max_power_on_wait_time_secs, now) {
                        if c.last_action.num_attempts >= limit {
                            c.last_action.failed = true;
                            c.status.status = StatusValue::Failed;
                            c.error = "node never reported its booted state".into();
                        } else {
                            c.status.status = StatusValue::PowerOnPending;
                        }
                    } else {
                        // Booting; the node has not reported in yet.
                        c.status.status = StatusValue::PowerOnCalled;
                    }
                } else {
                    // Running something unknown with a declared goal: cycle
                    // it into the known-good path.
                    c.status.phase = Phase::PoweringOff;
                    c.status.status = derive_status(c.status.phase, &c.last_action);
                }
            }
        },

        PowerState::Undefined => {}
    }
    c
}
