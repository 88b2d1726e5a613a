use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bosd_domain::{Component, OptionsSnapshot, Session};
use bosd_store::{typed, Kind};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::env::Env;
use crate::error::OperatorError;

// ── Component updates ─────────────────────────────────────────────────────────

/// A pending patch to one component: the key plus a pure `(before) → after`
/// function. The store applies it under its atomic read-modify-write, so the
/// function may run more than once and must not assume prior state beyond
/// what it observes.
pub struct ComponentUpdate {
    pub key: String,
    f: Box<dyn Fn(Component) -> Component + Send + Sync>,
}

impl ComponentUpdate {
    pub fn new(
        key: impl Into<String>,
        f: impl Fn(Component) -> Component + Send + Sync + 'static,
    ) -> Self {
        Self { key: key.into(), f: Box::new(f) }
    }

    pub fn apply(&self, component: Component) -> Component {
        (self.f)(component)
    }
}

// ── Operator traits ───────────────────────────────────────────────────────────

/// One long-running control loop. All operators share the same host loop
/// ([`run_operator`]); they differ only in what a single iteration does.
#[async_trait]
pub trait Operator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError>;
}

/// The common shape of the component-driven operators: filter the component
/// set by a state predicate, act on matches in bounded batches, patch the
/// results. [`ComponentLoop`] adapts this onto [`Operator`].
#[async_trait]
pub trait ComponentOperator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn filter(&self, component: &Component, opts: &OptionsSnapshot) -> bool;

    async fn act(
        &self,
        env: &Env,
        batch: Vec<Component>,
        opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate>;
}

/// Hosts a [`ComponentOperator`] inside the shared scan/act/patch iteration.
pub struct ComponentLoop<T>(pub T);

#[async_trait]
impl<T: ComponentOperator> Operator for ComponentLoop<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError> {
        let mut cursor: Option<String> = None;
        loop {
            let page = env
                .store
                .list_page(Kind::Components, cursor.as_deref(), opts.max_component_batch_size)
                .await?;

            let batch: Vec<Component> = page
                .records
                .iter()
                .filter_map(|(key, value)| parse_component(key, value.clone()))
                .filter(|c| self.0.filter(c, opts))
                .collect();

            if !batch.is_empty() {
                debug!(operator = self.0.name(), count = batch.len(), "acting on batch");
                let updates = self.0.act(env, batch, opts).await;
                apply_updates(env, self.0.name(), updates).await;
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }
}

/// Patch every update; a component deleted underneath us is not an error.
pub async fn apply_updates(env: &Env, operator: &str, updates: Vec<ComponentUpdate>) {
    for update in updates {
        let result = typed::patch_as::<Component, _>(env.store.as_ref(), Kind::Components, &update.key, |c| {
            update.apply(c)
        })
        .await;
        if let Err(e) = result {
            warn!(operator, key = %update.key, error = %e, "component patch failed");
        }
    }
}

fn parse_component(key: &str, value: serde_json::Value) -> Option<Component> {
    match serde_json::from_value(value) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(key = %key, error = %e, "skipping unparseable component record");
            None
        }
    }
}

/// Components the reconciling operators may touch: enabled, retry budget not
/// exhausted. The status operator deliberately does not use this.
pub fn reconcilable(component: &Component, opts: &OptionsSnapshot) -> bool {
    component.enabled && !component.retries_exhausted(opts.default_retry_policy)
}

/// Load every session, skipping records that fail to parse.
pub async fn scan_sessions(
    env: &Env,
    page_size: usize,
) -> Result<Vec<(String, Session)>, OperatorError> {
    let mut sessions = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = env
            .store
            .list_page(Kind::Sessions, cursor.as_deref(), page_size)
            .await?;
        for (key, value) in page.records {
            match serde_json::from_value::<Session>(value) {
                Ok(s) => sessions.push((key, s)),
                Err(e) => warn!(key = %key, error = %e, "skipping unparseable session record"),
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(sessions)
}

// ── The host loop ─────────────────────────────────────────────────────────────

fn touch_liveness(env: &Env, name: &str) {
    if let Some(dir) = &env.liveness_dir {
        let path = dir.join(name);
        if let Err(e) = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&path, chrono::Utc::now().to_rfc3339()))
        {
            warn!(operator = name, error = %e, "failed to touch liveness file");
        }
    }
}

/// Run one operator until shutdown. Iterations never abort the loop: store
/// and client failures are logged and retried after the next sleep. The
/// in-flight iteration always completes before the task exits.
pub async fn run_operator(env: Env, op: Arc<dyn Operator>, mut shutdown: watch::Receiver<bool>) {
    info!(operator = op.name(), "operator starting");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let opts = env.options.snapshot().await;
        touch_liveness(&env, op.name());

        if let Err(e) = op.run_once(&env, &opts).await {
            warn!(operator = op.name(), error = %e, "operator iteration failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(opts.polling_frequency_secs)) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!(operator = op.name(), "operator stopped");
}

/// The full operator bank, in the order the catalog lists them.
pub fn all_operators() -> Vec<Arc<dyn Operator>> {
    vec![
        Arc::new(crate::discovery::DiscoveryOperator),
        Arc::new(crate::session_setup::SessionSetupOperator),
        Arc::new(ComponentLoop(crate::configuration::ConfigurationOperator)),
        Arc::new(ComponentLoop(crate::power_on::PowerOnOperator)),
        Arc::new(ComponentLoop(crate::power_off::GracefulPowerOffOperator)),
        Arc::new(ComponentLoop(crate::power_off::ForcefulPowerOffOperator)),
        Arc::new(ComponentLoop(crate::status::StatusOperator)),
        Arc::new(crate::session_completion::SessionCompletionOperator),
        Arc::new(crate::cleanup::SessionCleanupOperator),
        Arc::new(ComponentLoop(crate::cleanup::ActualStateCleanupOperator)),
    ]
}
