use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bosd_client::{image_id_from_path, NodeSummary};
use bosd_domain::{
    looks_like_nid, BootArtifacts, BootSet, Component, ComponentState, Operation,
    OptionsSnapshot, Phase, Session, SessionState, SessionTemplate,
};
use bosd_store::{record_key, typed, Kind};
use chrono::Utc;
use tracing::{info, warn};

use crate::env::Env;
use crate::error::OperatorError;
use crate::framework::{scan_sessions, Operator};
use crate::options::{hsm_policy, ims_policy, manifest_policy};

/// Takes sessions in `pending` status, resolves each boot set to its
/// effective node set, stamps the resolved components with the session's
/// desired (or staged) state, and moves the session to `running`.
pub struct SessionSetupOperator;

/// Setup either produces a resolved node set or a reason the session cannot
/// run at all. Per-node problems (unknown ids) never fail the session; they
/// are recorded as skipped.
enum Setup {
    Resolved {
        components: Vec<String>,
        skipped: Vec<String>,
        warning: Option<String>,
    },
    Failed(String),
}

#[async_trait]
impl Operator for SessionSetupOperator {
    fn name(&self) -> &'static str {
        "session_setup"
    }

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError> {
        let sessions = scan_sessions(env, opts.max_component_batch_size).await?;
        for (key, session) in sessions {
            if session.status.status != SessionState::Pending {
                continue;
            }
            let outcome = setup_session(env, opts, &session).await?;
            finish(env, &key, &session, outcome).await?;
        }
        Ok(())
    }
}

async fn finish(
    env: &Env,
    key: &str,
    session: &Session,
    outcome: Setup,
) -> Result<(), OperatorError> {
    match outcome {
        Setup::Resolved { components, skipped, warning } => {
            info!(
                session = %session.name,
                tenant = %session.tenant,
                components = components.len(),
                skipped = skipped.len(),
                "session setup complete"
            );
            typed::patch_as::<Session, _>(env.store.as_ref(), Kind::Sessions, key, move |mut s| {
                s.components = components.clone();
                s.status.status = SessionState::Running;
                s.status.error = warning.clone();
                s.status.skipped_ids = skipped.clone();
                s
            })
            .await?;
        }
        Setup::Failed(reason) => {
            warn!(session = %session.name, tenant = %session.tenant, reason = %reason,
                "session setup failed");
            typed::patch_as::<Session, _>(env.store.as_ref(), Kind::Sessions, key, move |mut s| {
                s.status.status = SessionState::Complete;
                s.status.end_time = Some(Utc::now());
                s.status.error = Some(reason.clone());
                s
            })
            .await?;
        }
    }
    Ok(())
}

async fn setup_session(
    env: &Env,
    opts: &OptionsSnapshot,
    session: &Session,
) -> Result<Setup, OperatorError> {
    // 1. Load the template; a missing template fails the whole session.
    let template_key = record_key(&session.tenant, &session.template_name);
    let template: SessionTemplate = match typed::get_as(
        env.store.as_ref(),
        Kind::SessionTemplates,
        &template_key,
    )
    .await?
    {
        Some(t) => t,
        None => {
            return Ok(Setup::Failed(format!(
                "session template '{}' not found",
                session.template_name
            )))
        }
    };

    if opts.session_limit_required && session.limit.is_empty() {
        return Ok(Setup::Failed("a session limit is required but none was given".into()));
    }

    let inventory: HashMap<String, NodeSummary> = env
        .clients
        .hardware
        .list_nodes(hsm_policy(opts))
        .await?
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect();

    let mut all_resolved: Vec<String> = Vec::new();
    let mut all_skipped: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for (bs_name, bs) in &template.boot_sets {
        // 2g. Numeric-id heuristic applies to every explicit selector.
        if opts.reject_nids {
            let offending = bs
                .node_list
                .iter()
                .map(String::as_str)
                .chain(session.limit.split(',').filter(|s| !s.is_empty()))
                .find(|s| looks_like_nid(s.trim_start_matches(['&', '!'])));
            if let Some(nid) = offending {
                return Ok(Setup::Failed(format!(
                    "selector '{}' looks like a numeric node id and reject_nids is set",
                    nid
                )));
            }
        }

        // 2a. Union of explicit nodes, group members and role members.
        let mut candidates: Vec<String> = bs.node_list.clone();
        if !bs.node_groups.is_empty() {
            candidates.extend(
                env.clients
                    .hardware
                    .expand_groups(&bs.node_groups, hsm_policy(opts))
                    .await?,
            );
        }
        if !bs.node_roles_groups.is_empty() {
            candidates.extend(
                env.clients
                    .hardware
                    .expand_roles(&bs.node_roles_groups, hsm_policy(opts))
                    .await?,
            );
        }
        candidates.sort();
        candidates.dedup();

        // 2b + step 6: architecture filter; ids the hardware state manager
        // has never heard of are skipped, not fatal.
        let mut ids: Vec<String> = Vec::new();
        for id in candidates {
            match inventory.get(&id) {
                Some(node) if node.arch == bs.arch => ids.push(id),
                Some(_) => {} // wrong architecture for this boot set
                None => all_skipped.push(id),
            }
        }

        // 2c. Drop disabled components unless the session includes them.
        if !session.include_disabled {
            let keys: Vec<String> = ids.iter().map(|id| record_key(&session.tenant, id)).collect();
            let records = env.store.get_multi(Kind::Components, &keys).await?;
            ids.retain(|id| {
                let key = record_key(&session.tenant, id);
                match records.get(&key) {
                    Some(value) => serde_json::from_value::<Component>(value.clone())
                        .map(|c| c.enabled)
                        .unwrap_or(true),
                    // No record yet: it will be created enabled below.
                    None => true,
                }
            });
        }

        // 2d. Drop nodes locked by the hardware state manager.
        if !ids.is_empty() {
            let locked = env.clients.hardware.locked_nodes(&ids, hsm_policy(opts)).await?;
            ids.retain(|id| !locked.contains(id));
        }

        // 2e. A tenant only reaches nodes it owns.
        if !session.tenant.is_empty() && !ids.is_empty() {
            let owned = env
                .clients
                .tenants
                .owned_nodes(&session.tenant, hsm_policy(opts))
                .await?;
            ids.retain(|id| owned.contains(id));
        }

        // 2f. Session limit selector.
        if !session.limit.is_empty() {
            ids = apply_limit(env, opts, ids, &session.limit).await?;
        }

        // 3. Image bookkeeping and artifact resolution.
        let artifacts = match resolve_boot_artifacts(env, opts, bs).await? {
            Ok(a) => a,
            Err(warning) => {
                if opts.ims_errors_fatal {
                    return Ok(Setup::Failed(warning));
                }
                warnings.push(warning);
                bs.boot_artifacts()
            }
        };
        if session.operation != Operation::Shutdown && artifacts.is_empty() {
            return Ok(Setup::Failed(format!(
                "boot set '{}' resolves to no boot artifacts",
                bs_name
            )));
        }

        // 4/5. Stamp every resolved component.
        for id in &ids {
            stamp_component(env, session, &template, bs, &artifacts, id).await?;
        }
        all_resolved.extend(ids);
    }

    all_resolved.sort();
    all_resolved.dedup();
    all_skipped.sort();
    all_skipped.dedup();

    let warning = if warnings.is_empty() {
        None
    } else {
        Some(warnings.join("; "))
    };
    Ok(Setup::Resolved {
        components: all_resolved,
        skipped: all_skipped,
        warning,
    })
}

/// Resolve the boot artifacts for a boot set, consulting IMS and the image
/// manifest where the template does not carry them inline. `Err` carries a
/// warning message whose severity the caller decides via `ims_errors_fatal`.
async fn resolve_boot_artifacts(
    env: &Env,
    opts: &OptionsSnapshot,
    bs: &BootSet,
) -> Result<Result<BootArtifacts, String>, OperatorError> {
    if bs.path.is_empty() {
        return Ok(Ok(bs.boot_artifacts()));
    }

    let image_id = image_id_from_path(&bs.path).map(str::to_string);
    if let Some(image_id) = &image_id {
        match env.clients.images.get_image(image_id, ims_policy(opts)).await? {
            Some(image) => {
                // SBPS-rooted images are tagged so the provisioner exports them.
                if bs.rootfs_provider.eq_ignore_ascii_case("sbps") {
                    env.clients
                        .images
                        .tag_image(&image.id, "sbps-project", "true", ims_policy(opts))
                        .await?;
                }
            }
            None if opts.ims_images_must_exist => {
                return Ok(Err(format!("image '{}' does not exist in IMS", image_id)));
            }
            None => {}
        }
    }

    if !bs.kernel.is_empty() {
        return Ok(Ok(bs.boot_artifacts()));
    }

    // Inline artifacts absent: read them out of the image manifest.
    let manifest = match env
        .clients
        .objects
        .fetch_manifest(&bs.path, manifest_policy(opts))
        .await
    {
        Ok(m) => m,
        Err(e) => return Ok(Err(format!("manifest fetch for '{}' failed: {}", bs.path, e))),
    };

    let mut artifacts = bs.boot_artifacts();
    if let Some(entries) = manifest["artifacts"].as_array() {
        for entry in entries {
            let link = entry["link"]["path"].as_str().unwrap_or_default();
            match entry["type"].as_str() {
                Some("kernel") => artifacts.kernel = link.to_string(),
                Some("initrd") => artifacts.initrd = link.to_string(),
                _ => {}
            }
        }
    }
    if artifacts.is_empty() {
        return Ok(Err(format!("manifest at '{}' lists no kernel or initrd", bs.path)));
    }
    Ok(Ok(artifacts))
}

async fn stamp_component(
    env: &Env,
    session: &Session,
    template: &SessionTemplate,
    bs: &BootSet,
    artifacts: &BootArtifacts,
    id: &str,
) -> Result<(), OperatorError> {
    let key = record_key(&session.tenant, id);

    // Implicit creation: referencing an unknown-but-real node brings its
    // component record into existence.
    if env.store.get(Kind::Components, &key).await?.is_none() {
        typed::put_as(
            env.store.as_ref(),
            Kind::Components,
            &key,
            &Component::new(id, &session.tenant),
        )
        .await?;
    }

    let configuration = if template.enable_cfs {
        bs.cfs_configuration.clone()
    } else {
        String::new()
    };
    let new_state = match session.operation {
        // Shutdown declares "nothing booted" as the goal.
        Operation::Shutdown => ComponentState::default(),
        _ => ComponentState {
            boot_artifacts: artifacts.clone(),
            configuration,
            bss_token: String::new(),
        },
    };
    let session_name = session.name.clone();
    let stage = session.stage;
    let operation = session.operation;

    typed::patch_as::<Component, _>(env.store.as_ref(), Kind::Components, &key, move |mut c| {
        c.session = session_name.clone();
        if stage {
            // Staged writes park the goal; nothing else changes until an
            // explicit apply-staged.
            c.staged_state = new_state.clone();
            return c;
        }
        c.desired_state = new_state.clone();
        c.last_action = Default::default();
        c.error = String::new();
        c.event_stats = Default::default();
        c.status.status_override = None;
        match operation {
            Operation::Reboot => {
                // A reboot is a forced power cycle even when the node already
                // runs the desired artifacts.
                if !c.boot_artifacts_match() {
                    c.actual_state = None;
                }
                c.status.phase = Phase::PoweringOff;
            }
            Operation::Boot => {
                if !c.boot_artifacts_match() {
                    c.actual_state = None;
                }
                c.status.phase = Phase::None;
            }
            Operation::Shutdown => {
                c.status.phase = Phase::None;
            }
        }
        c.status.status = bosd_domain::derive_status(c.status.phase, &c.last_action);
        c
    })
    .await?;
    Ok(())
}

/// Apply the session `limit` selector to the candidate set.
///
/// Comma-separated items: a bare item unions matching nodes in, a leading
/// `&` intersects, a leading `!` excludes. `*` matches every candidate.
/// Items that are not candidate ids are treated as hardware group names.
async fn apply_limit(
    env: &Env,
    opts: &OptionsSnapshot,
    candidates: Vec<String>,
    limit: &str,
) -> Result<Vec<String>, OperatorError> {
    let candidate_set: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let mut selected: HashSet<String> = HashSet::new();

    for raw in limit.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (op, name) = match raw.strip_prefix('&') {
            Some(rest) => ('&', rest),
            None => match raw.strip_prefix('!') {
                Some(rest) => ('!', rest),
                None => ('+', raw),
            },
        };

        let matched: HashSet<String> = if name == "*" {
            candidates.iter().cloned().collect()
        } else if candidate_set.contains(name) {
            std::iter::once(name.to_string()).collect()
        } else {
            env.clients
                .hardware
                .expand_groups(&[name.to_string()], hsm_policy(opts))
                .await?
                .into_iter()
                .filter(|id| candidate_set.contains(id.as_str()))
                .collect()
        };

        match op {
            '+' => selected.extend(matched),
            '&' => selected.retain(|id| matched.contains(id)),
            _ => selected.retain(|id| !matched.contains(id)),
        }
    }

    let mut out: Vec<String> = candidates.into_iter().filter(|id| selected.contains(id)).collect();
    out.sort();
    Ok(out)
}
