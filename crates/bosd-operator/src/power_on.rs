use std::collections::HashMap;

use async_trait::async_trait;
use bosd_client::{image_id_from_path, TransitionKind};
use bosd_domain::{derive_status, ActionKind, Component, OptionsSnapshot, Phase, StatusValue};
use bosd_store::{record_key, Kind};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::env::Env;
use crate::framework::{reconcilable, ComponentOperator, ComponentUpdate};
use crate::options::{bss_policy, ims_policy, pcs_policy};

/// Boots components whose declared artifacts are not running: registers the
/// boot parameters with the boot-script service under a fresh referral
/// token, then requests power-on from the power-control service in one
/// batched transition.
pub struct PowerOnOperator;

#[async_trait]
impl ComponentOperator for PowerOnOperator {
    fn name(&self) -> &'static str {
        "power_on"
    }

    fn filter(&self, c: &Component, opts: &OptionsSnapshot) -> bool {
        reconcilable(c, opts)
            && !c.desired_state.boot_artifacts.is_empty()
            && matches!(
                c.status.effective(),
                StatusValue::Off | StatusValue::PowerOnPending
            )
    }

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        let mut updates = Vec::new();
        // id → (referral token, error)
        let mut tokens: HashMap<String, String> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();
        let mut to_power: Vec<String> = Vec::new();

        for c in &batch {
            // (a) The image must still exist when the deployment insists.
            if opts.ims_images_must_exist {
                if let Some(image_id) = image_id_from_path(&c.desired_state.boot_artifacts.kernel)
                {
                    match env.clients.images.get_image(image_id, ims_policy(opts)).await {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            errors.insert(
                                c.id.clone(),
                                format!("image '{}' no longer exists in IMS", image_id),
                            );
                            continue;
                        }
                        Err(e) => {
                            if opts.ims_errors_fatal {
                                errors.insert(c.id.clone(), e.to_string());
                                continue;
                            }
                            debug!(component_id = %c.id, error = %e,
                                "IMS lookup failed, booting anyway");
                        }
                    }
                }
            }

            // (b) Referral token + boot parameters. The token is minted per
            // component and per attempt; BSS maps it back to these
            // parameters on network boot.
            let token = Uuid::new_v4().to_string();
            let ids = vec![c.id.clone()];
            match env
                .clients
                .boot_script
                .set_boot_params(&ids, &c.desired_state.boot_artifacts, &token, bss_policy(opts))
                .await
            {
                Ok(()) => {
                    let token_key = record_key(&c.tenant, &c.id);
                    if let Err(e) = env
                        .store
                        .put(Kind::BssTokens, &token_key, serde_json::json!(token))
                        .await
                    {
                        warn!(component_id = %c.id, error = %e, "failed to persist referral token");
                    }
                    tokens.insert(c.id.clone(), token);
                    to_power.push(c.id.clone());
                }
                Err(e) => {
                    errors.insert(c.id.clone(), format!("boot parameter registration failed: {}", e));
                }
            }
        }

        // (c) One batched power-on for everything that got boot parameters.
        if !to_power.is_empty() {
            match env
                .clients
                .power
                .transition(TransitionKind::On, &to_power, pcs_policy(opts))
                .await
            {
                Ok(outcome) => {
                    for (id, reason) in outcome.failed {
                        errors.insert(id, reason);
                    }
                }
                Err(e) => {
                    // Whole-batch failure counts as an attempt against every
                    // component in it.
                    for id in &to_power {
                        errors.insert(id.clone(), format!("power-on request failed: {}", e));
                    }
                }
            }
        }

        for c in batch {
            let key = record_key(&c.tenant, &c.id);
            let token = tokens.get(&c.id).cloned();
            let error = errors.get(&c.id).cloned();
            updates.push(ComponentUpdate::new(key, move |mut c: Component| {
                c.last_action.record(ActionKind::PowerOn, Utc::now());
                c.event_stats.power_on_attempts += 1;
                c.status.phase = Phase::PoweringOn;
                if let Some(token) = &token {
                    c.desired_state.bss_token = token.clone();
                }
                match &error {
                    Some(reason) => c.error = reason.clone(),
                    None => c.error = String::new(),
                }
                c.status.status = derive_status(c.status.phase, &c.last_action);
                c
            }));
        }
        updates
    }
}
