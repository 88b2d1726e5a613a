use std::collections::HashMap;

use async_trait::async_trait;
use bosd_client::CfsState;
use bosd_domain::{Component, OptionsSnapshot, Phase, StatusValue};
use bosd_store::record_key;
use tracing::debug;

use crate::env::Env;
use crate::framework::{reconcilable, ComponentOperator, ComponentUpdate};
use crate::options::cfs_policy;

/// Pushes the desired configuration of freshly-booted components into the
/// configuration framework. A component qualifies once its observed boot
/// artifacts equal the desired ones; the status operator then watches the
/// framework until it reports `configured`.
pub struct ConfigurationOperator;

#[async_trait]
impl ComponentOperator for ConfigurationOperator {
    fn name(&self) -> &'static str {
        "configuration"
    }

    fn filter(&self, c: &Component, opts: &OptionsSnapshot) -> bool {
        reconcilable(c, opts)
            && !c.desired_state.configuration.is_empty()
            && matches!(
                c.status.effective(),
                StatusValue::Stable | StatusValue::Configuring
            )
            && c.boot_artifacts_match()
    }

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        let mut updates = Vec::new();

        // Group by configuration so each framework call carries one id list.
        let mut by_config: HashMap<String, Vec<Component>> = HashMap::new();
        for c in batch {
            by_config
                .entry(c.desired_state.configuration.clone())
                .or_default()
                .push(c);
        }

        for (config, components) in by_config {
            let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();

            // Only components the framework does not know about yet need the
            // desired configuration posted.
            let states = match env.clients.config.config_status(&ids, cfs_policy(opts)).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "configuration status read failed, retrying next pass");
                    continue;
                }
            };
            let unsubmitted: Vec<String> = ids
                .iter()
                .filter(|id| {
                    matches!(
                        states.get(id.as_str()).copied().unwrap_or(CfsState::Unknown),
                        CfsState::Unknown
                    )
                })
                .cloned()
                .collect();

            let mut failed: HashMap<String, String> = HashMap::new();
            if !unsubmitted.is_empty() {
                match env
                    .clients
                    .config
                    .set_desired_config(&unsubmitted, &config, cfs_policy(opts))
                    .await
                {
                    Ok(outcome) => failed.extend(outcome.failed),
                    Err(e) => {
                        debug!(error = %e, "desired configuration post failed, retrying next pass");
                        continue;
                    }
                }
            }

            for c in components {
                let key = record_key(&c.tenant, &c.id);
                let error = failed.get(&c.id).cloned();
                updates.push(ComponentUpdate::new(key, move |mut c: Component| {
                    c.status.phase = Phase::Configuring;
                    c.status.status = StatusValue::Configuring;
                    if let Some(reason) = &error {
                        c.error = reason.clone();
                    }
                    c
                }));
            }
        }
        updates
    }
}
