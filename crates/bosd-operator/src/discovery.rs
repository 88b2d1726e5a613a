use std::collections::HashSet;

use async_trait::async_trait;
use bosd_domain::{Component, OptionsSnapshot};
use bosd_store::{record_key, split_key, typed, Kind};
use tracing::info;

use crate::env::Env;
use crate::error::OperatorError;
use crate::framework::{apply_updates, ComponentUpdate, Operator};
use crate::options::hsm_policy;

/// Mirrors the hardware state manager's node inventory into the component
/// set: nodes bosd has never seen get a fresh enabled record in the
/// untenanted bucket, and components whose hardware has vanished are
/// disabled — never deleted, so their history survives re-discovery.
pub struct DiscoveryOperator;

#[async_trait]
impl Operator for DiscoveryOperator {
    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError> {
        let inventory = env.clients.hardware.list_nodes(hsm_policy(opts)).await?;
        let known_hardware: HashSet<&str> = inventory.iter().map(|n| n.id.as_str()).collect();

        // Ids present in any tenant bucket count as known.
        let existing_keys = env.store.list_keys(Kind::Components, "").await?;
        let existing_ids: HashSet<String> = existing_keys
            .iter()
            .map(|k| split_key(k).1.to_string())
            .collect();

        let mut created = 0usize;
        for node in &inventory {
            if existing_ids.contains(&node.id) {
                continue;
            }
            let component = Component::new(&node.id, "");
            typed::put_as(
                env.store.as_ref(),
                Kind::Components,
                &record_key("", &node.id),
                &component,
            )
            .await?;
            created += 1;
        }

        // Disable components whose hardware the state manager no longer
        // reports.
        let mut updates = Vec::new();
        for key in &existing_keys {
            let id = split_key(key).1;
            if !known_hardware.contains(id) {
                updates.push(ComponentUpdate::new(key.clone(), |mut c: Component| {
                    if c.enabled {
                        c.enabled = false;
                        c.error = "hardware no longer reported by the state manager".into();
                    }
                    c
                }));
            }
        }
        let disabled = updates.len();
        apply_updates(env, self.name(), updates).await;

        if created > 0 || disabled > 0 {
            info!(created, disabled, "discovery reconciled component inventory");
        }
        Ok(())
    }
}
