use async_trait::async_trait;
use bosd_domain::{Component, OptionsSnapshot, Session, SessionState};
use bosd_store::{typed, Kind};
use chrono::Utc;
use tracing::info;

use crate::env::Env;
use crate::error::OperatorError;
use crate::framework::{scan_sessions, Operator};
use crate::session_status::aggregate;

/// Watches running sessions and marks them complete once every owned
/// component has reached a terminal state for the session's operation.
pub struct SessionCompletionOperator;

#[async_trait]
impl Operator for SessionCompletionOperator {
    fn name(&self) -> &'static str {
        "session_completion"
    }

    async fn run_once(&self, env: &Env, opts: &OptionsSnapshot) -> Result<(), OperatorError> {
        let sessions = scan_sessions(env, opts.max_component_batch_size).await?;
        for (key, session) in sessions {
            if session.status.status != SessionState::Running {
                continue;
            }
            let report = aggregate(env.store.as_ref(), &session).await?;
            if !report.terminal {
                continue;
            }

            info!(
                session = %session.name,
                tenant = %session.tenant,
                percent_complete = report.percent_complete,
                percent_failed = report.percent_failed,
                "session complete"
            );
            typed::patch_as::<Session, _>(env.store.as_ref(), Kind::Sessions, &key, |mut s| {
                s.status.status = SessionState::Complete;
                if s.status.end_time.is_none() {
                    s.status.end_time = Some(Utc::now());
                }
                s
            })
            .await?;

            if opts.disable_components_on_completion {
                for component_key in &report.component_keys {
                    typed::patch_as::<Component, _>(
                        env.store.as_ref(),
                        Kind::Components,
                        component_key,
                        |mut c| {
                            c.enabled = false;
                            c
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}
