use std::collections::BTreeMap;

use bosd_domain::{derive_status, Component, Phase};
use bosd_store::{record_key, typed, Kind, StateStore, StoreError};
use serde::Serialize;

use crate::error::OperatorError;

/// Per-id results of an apply-staged request.
#[derive(Debug, Default, Serialize)]
pub struct ApplyStagedOutcome {
    pub succeeded: Vec<String>,
    /// Components that had nothing staged.
    pub ignored: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

/// Promote each component's staged state to its desired state in one atomic
/// patch per component: `desired ← staged, staged ← ∅`. Single-phase — the
/// regular operator bank picks the new goal up on its next pass.
pub async fn apply_staged(
    store: &dyn StateStore,
    tenant: &str,
    ids: &[String],
) -> Result<ApplyStagedOutcome, OperatorError> {
    let mut outcome = ApplyStagedOutcome::default();

    for id in ids {
        let key = record_key(tenant, id);
        let result = typed::try_patch_as::<Component, _>(store, Kind::Components, &key, |mut c| {
            if c.staged_state.is_empty() {
                return Err(StoreError::PatchRejected("nothing staged".into()));
            }
            c.desired_state = std::mem::take(&mut c.staged_state);
            c.last_action = Default::default();
            c.error = String::new();
            c.event_stats = Default::default();
            c.status.phase = Phase::None;
            c.status.status = derive_status(c.status.phase, &c.last_action);
            Ok(c)
        })
        .await;

        match result {
            Ok(_) => outcome.succeeded.push(id.clone()),
            Err(StoreError::PatchRejected(_)) => outcome.ignored.push(id.clone()),
            Err(StoreError::NotFound { .. }) => {
                outcome
                    .errors
                    .insert(id.clone(), "component not found".to_string());
            }
            Err(e) => {
                outcome.errors.insert(id.clone(), e.to_string());
            }
        }
    }
    Ok(outcome)
}
