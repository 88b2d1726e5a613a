use std::collections::HashMap;

use async_trait::async_trait;
use bosd_client::TransitionKind;
use bosd_domain::{derive_status, ActionKind, Component, OptionsSnapshot, StatusValue};
use bosd_store::record_key;
use chrono::{Duration as ChronoDuration, Utc};

use crate::env::Env;
use crate::framework::{reconcilable, ComponentOperator, ComponentUpdate};
use crate::options::pcs_policy;

async fn power_off_batch(
    env: &Env,
    batch: Vec<Component>,
    opts: &OptionsSnapshot,
    kind: TransitionKind,
    action: ActionKind,
) -> Vec<ComponentUpdate> {
    let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();

    let mut errors: HashMap<String, String> = HashMap::new();
    match env.clients.power.transition(kind, &ids, pcs_policy(opts)).await {
        Ok(outcome) => {
            for (id, reason) in outcome.failed {
                errors.insert(id, reason);
            }
        }
        Err(e) => {
            for id in &ids {
                errors.insert(id.clone(), format!("power-off request failed: {}", e));
            }
        }
    }

    batch
        .into_iter()
        .map(|c| {
            let key = record_key(&c.tenant, &c.id);
            let error = errors.get(&c.id).cloned();
            ComponentUpdate::new(key, move |mut c: Component| {
                c.last_action.record(action, Utc::now());
                match action {
                    ActionKind::PowerOffForcefully => {
                        c.event_stats.power_off_forceful_attempts += 1
                    }
                    _ => c.event_stats.power_off_graceful_attempts += 1,
                }
                match &error {
                    Some(reason) => c.error = reason.clone(),
                    None => c.error = String::new(),
                }
                c.status.status = derive_status(c.status.phase, &c.last_action);
                c
            })
        })
        .collect()
}

/// First stage of powering a node down: ask nicely.
pub struct GracefulPowerOffOperator;

#[async_trait]
impl ComponentOperator for GracefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_graceful"
    }

    fn filter(&self, c: &Component, opts: &OptionsSnapshot) -> bool {
        reconcilable(c, opts) && c.status.effective() == StatusValue::PowerOffPending
    }

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        power_off_batch(env, batch, opts, TransitionKind::Off, ActionKind::PowerOffGracefully)
            .await
    }
}

/// Escalation: a graceful power-off that has not produced an observed
/// power-off within the wait window is followed by a forceful one. Repeats
/// (still within the retry budget) if the node stays up.
pub struct ForcefulPowerOffOperator;

#[async_trait]
impl ComponentOperator for ForcefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_forceful"
    }

    fn filter(&self, c: &Component, opts: &OptionsSnapshot) -> bool {
        if !reconcilable(c, opts) {
            return false;
        }
        let overdue = Utc::now() - c.last_action.last_updated
            > ChronoDuration::seconds(opts.max_power_off_wait_time_secs as i64);
        matches!(
            c.status.effective(),
            StatusValue::PowerOffGracefullyCalled | StatusValue::PowerOffForcefullyCalled
        ) && overdue
    }

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        power_off_batch(
            env,
            batch,
            opts,
            TransitionKind::ForceOff,
            ActionKind::PowerOffForcefully,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bosd_client::{Clients, PowerState, StubClients};
    use bosd_domain::Phase;
    use bosd_store::{typed, InMemoryStore, Kind};

    use crate::framework::{ComponentLoop, Operator};

    fn pending_off(id: &str) -> Component {
        let mut c = Component::new(id, "");
        c.status.phase = Phase::PoweringOff;
        c.status.status = StatusValue::PowerOffPending;
        c
    }

    fn env_with_stub() -> (Env, StubClients) {
        let stub = StubClients::new();
        let env = Env::new(Arc::new(InMemoryStore::new()), Clients::stub(&stub), None);
        (env, stub)
    }

    #[tokio::test]
    async fn graceful_off_is_requested_and_recorded() {
        let (env, stub) = env_with_stub();
        stub.add_node("x3", bosd_domain::Arch::X86, true, "Compute");
        stub.set_power("x3", PowerState::On);
        typed::put_as(env.store.as_ref(), Kind::Components, "/x3", &pending_off("x3"))
            .await
            .unwrap();

        ComponentLoop(GracefulPowerOffOperator)
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let c: Component = typed::get_as(env.store.as_ref(), Kind::Components, "/x3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.last_action.action, ActionKind::PowerOffGracefully);
        assert_eq!(c.status.status, StatusValue::PowerOffGracefullyCalled);
        assert_eq!(c.event_stats.power_off_graceful_attempts, 1);
        assert_eq!(stub.power_of("x3"), Some(PowerState::Off));
    }

    #[tokio::test]
    async fn forceful_waits_for_the_escalation_window() {
        let (env, stub) = env_with_stub();
        stub.add_node("x3", bosd_domain::Arch::X86, true, "Compute");
        stub.set_power("x3", PowerState::On);

        let mut c = pending_off("x3");
        c.last_action.record(ActionKind::PowerOffGracefully, Utc::now());
        c.status.status = StatusValue::PowerOffGracefullyCalled;
        typed::put_as(env.store.as_ref(), Kind::Components, "/x3", &c)
            .await
            .unwrap();

        // Graceful was just called: not yet overdue, nothing happens.
        ComponentLoop(ForcefulPowerOffOperator)
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();
        assert_eq!(stub.power_of("x3"), Some(PowerState::On));

        // Backdate the action past the wait window: escalation fires once.
        typed::patch_as::<Component, _>(env.store.as_ref(), Kind::Components, "/x3", |mut c| {
            c.last_action.last_updated = Utc::now() - ChronoDuration::seconds(600);
            c
        })
        .await
        .unwrap();

        ComponentLoop(ForcefulPowerOffOperator)
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let c: Component = typed::get_as(env.store.as_ref(), Kind::Components, "/x3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.last_action.action, ActionKind::PowerOffForcefully);
        assert_eq!(c.status.status, StatusValue::PowerOffForcefullyCalled);
        assert_eq!(c.event_stats.power_off_forceful_attempts, 1);
        assert_eq!(stub.power_of("x3"), Some(PowerState::Off));
    }
}
