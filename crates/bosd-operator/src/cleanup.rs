use async_trait::async_trait;
use bosd_domain::{Component, OptionsSnapshot, SessionState, StatusValue};
use bosd_store::{record_key, typed, Kind};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use crate::env::Env;
use crate::error::OperatorError;
use crate::framework::{scan_sessions, ComponentOperator, ComponentUpdate, Operator};

/// Deletes completed sessions after a grace period and detaches their
/// components, so records do not accumulate forever.
pub struct SessionCleanupOperator;

#[async_trait]
impl Operator for SessionCleanupOperator {
    fn name(&self) -> &'static str {
        "session_cleanup"
    }

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError> {
        let retention = ChronoDuration::hours(opts.cleanup_completed_session_ttl_hours as i64);
        let now = Utc::now();

        let sessions = scan_sessions(env, opts.max_component_batch_size).await?;
        for (key, session) in sessions {
            if session.status.status != SessionState::Complete {
                continue;
            }
            let expired = session
                .status
                .end_time
                .map(|end| now - end > retention)
                .unwrap_or(false);
            if !expired {
                continue;
            }

            // Detach before delete so no component keeps pointing at a
            // session that no longer exists.
            let prefix = bosd_store::tenant_prefix(&session.tenant);
            let component_keys = env.store.list_keys(Kind::Components, &prefix).await?;
            for component_key in component_keys {
                let session_name = session.name.clone();
                let _ = typed::patch_as::<Component, _>(
                    env.store.as_ref(),
                    Kind::Components,
                    &component_key,
                    move |mut c| {
                        if c.session == session_name {
                            c.session = String::new();
                        }
                        c
                    },
                )
                .await;
            }

            info!(session = %session.name, tenant = %session.tenant, "deleting expired session");
            env.store.delete(Kind::Sessions, &key).await?;
        }
        Ok(())
    }
}

/// Clears actual state that has gone stale: a node that has not reported in
/// for longer than the TTL can no longer be assumed to run what it last
/// reported.
pub struct ActualStateCleanupOperator;

#[async_trait]
impl ComponentOperator for ActualStateCleanupOperator {
    fn name(&self) -> &'static str {
        "actual_state_cleanup"
    }

    fn filter(&self, c: &Component, opts: &OptionsSnapshot) -> bool {
        let ttl = ChronoDuration::hours(opts.component_actual_state_ttl_hours as i64);
        c.enabled
            && c.actual_state
                .as_ref()
                .map(|a| Utc::now() - a.last_updated > ttl)
                .unwrap_or(false)
    }

    async fn act(
        &self,
        _env: &Env,
        batch: Vec<Component>,
        _opts: &OptionsSnapshot,
    ) -> Vec<ComponentUpdate> {
        batch
            .into_iter()
            .map(|c| {
                ComponentUpdate::new(record_key(&c.tenant, &c.id), |mut c: Component| {
                    c.actual_state = None;
                    c.status.status = StatusValue::Stable;
                    c
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bosd_client::{Clients, StubClients};
    use bosd_domain::{BootArtifacts, ComponentActualState, Operation, Session};
    use bosd_store::InMemoryStore;

    use crate::framework::ComponentLoop;

    fn env() -> Env {
        Env::new(
            Arc::new(InMemoryStore::new()),
            Clients::stub(&StubClients::new()),
            None,
        )
    }

    #[tokio::test]
    async fn expired_sessions_are_deleted_and_components_detached() {
        let env = env();
        let mut s = Session::new("s1", "", "tpl", Operation::Boot, Utc::now());
        s.status.status = SessionState::Complete;
        s.status.end_time = Some(Utc::now() - ChronoDuration::hours(48));
        typed::put_as(env.store.as_ref(), Kind::Sessions, "/s1", &s)
            .await
            .unwrap();

        let mut c = Component::new("x1", "");
        c.session = "s1".into();
        typed::put_as(env.store.as_ref(), Kind::Components, "/x1", &c)
            .await
            .unwrap();

        SessionCleanupOperator
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        assert!(env.store.get(Kind::Sessions, "/s1").await.unwrap().is_none());
        let c: Component = typed::get_as(env.store.as_ref(), Kind::Components, "/x1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.session, "");
    }

    #[tokio::test]
    async fn recent_sessions_survive_cleanup() {
        let env = env();
        let mut s = Session::new("s1", "", "tpl", Operation::Boot, Utc::now());
        s.status.status = SessionState::Complete;
        s.status.end_time = Some(Utc::now());
        typed::put_as(env.store.as_ref(), Kind::Sessions, "/s1", &s)
            .await
            .unwrap();

        SessionCleanupOperator
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        assert!(env.store.get(Kind::Sessions, "/s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_actual_state_is_cleared() {
        let env = env();
        let mut c = Component::new("x1", "");
        c.actual_state = Some(ComponentActualState {
            boot_artifacts: BootArtifacts::default(),
            configuration: String::new(),
            bss_token: String::new(),
            last_updated: Utc::now() - ChronoDuration::hours(12),
        });
        typed::put_as(env.store.as_ref(), Kind::Components, "/x1", &c)
            .await
            .unwrap();

        ComponentLoop(ActualStateCleanupOperator)
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let c: Component = typed::get_as(env.store.as_ref(), Kind::Components, "/x1")
            .await
            .unwrap()
            .unwrap();
        assert!(c.actual_state.is_none());
        assert_eq!(c.status.status, StatusValue::Stable);
    }

    #[tokio::test]
    async fn fresh_actual_state_is_kept() {
        let env = env();
        let mut c = Component::new("x1", "");
        c.actual_state = Some(ComponentActualState {
            boot_artifacts: BootArtifacts::default(),
            configuration: String::new(),
            bss_token: String::new(),
            last_updated: Utc::now(),
        });
        typed::put_as(env.store.as_ref(), Kind::Components, "/x1", &c)
            .await
            .unwrap();

        ComponentLoop(ActualStateCleanupOperator)
            .run_once(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let c: Component = typed::get_as(env.store.as_ref(), Kind::Components, "/x1")
            .await
            .unwrap()
            .unwrap();
        assert!(c.actual_state.is_some());
    }
}
