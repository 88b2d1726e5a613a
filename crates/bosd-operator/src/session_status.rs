use std::collections::BTreeMap;

use bosd_domain::{Component, Operation, Phase, Session, SessionState, StatusValue};
use bosd_store::{Kind, StateStore};
use serde::Serialize;

use crate::error::OperatorError;

const AGGREGATE_PAGE: usize = 500;

/// Session-level status derived on demand from the component records owning
/// the session. Aggregation is pure: repeated runs over a quiescent
/// component set return identical values.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStatusReport {
    pub status: SessionState,
    pub managed_count: usize,
    pub phase_percentages: BTreeMap<String, f64>,
    pub percent_complete: f64,
    pub percent_failed: f64,
    pub error_summary: BTreeMap<String, Vec<String>>,
    pub terminal: bool,
    #[serde(skip)]
    pub component_keys: Vec<String>,
}

/// Done means *stable and matching the declared goal*, not merely carrying a
/// stable status: a component freshly stamped by session setup reads stable
/// until the status operator's next pass, and must not complete a session.
fn is_done(session: &Session, c: &Component) -> bool {
    match session.operation {
        Operation::Boot | Operation::Reboot => {
            c.status.effective() == StatusValue::Stable && c.boot_artifacts_match()
        }
        Operation::Shutdown => c.status.effective() == StatusValue::Off,
    }
}

/// A component whose stored phase has not caught up with its new goal yet.
/// Excluded from the phase denominators until the status operator makes the
/// phase visible.
fn awaiting_phase_update(session: &Session, c: &Component) -> bool {
    matches!(session.operation, Operation::Boot | Operation::Reboot)
        && c.status.effective() == StatusValue::Stable
        && !c.boot_artifacts_match()
}

pub async fn aggregate(
    store: &dyn StateStore,
    session: &Session,
) -> Result<SessionStatusReport, OperatorError> {
    let mut owned: Vec<(String, Component)> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .list_page(Kind::Components, cursor.as_deref(), AGGREGATE_PAGE)
            .await?;
        for (key, value) in page.records {
            if let Ok(c) = serde_json::from_value::<Component>(value) {
                if c.session == session.name && c.tenant == session.tenant {
                    owned.push((key, c));
                }
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let total = owned.len();
    let failed: Vec<&Component> = owned
        .iter()
        .map(|(_, c)| c)
        .filter(|c| c.status.effective() == StatusValue::Failed)
        .collect();
    let done_count = owned.iter().filter(|(_, c)| is_done(session, c)).count();

    // Components whose phase update is not yet visible are excluded from
    // every percentage denominator. Failed components stay eligible for the
    // completion percentages: a failed component is a terminal outcome, not
    // an invisible one.
    let eligible = total
        - owned
            .iter()
            .filter(|(_, c)| awaiting_phase_update(session, c))
            .count();

    // Failed components are excluded from the phase denominators (they are
    // not going anywhere), as are components whose phase update is not yet
    // visible.
    let mut non_failed = 0usize;
    let mut phase_counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, c) in &owned {
        if c.status.effective() == StatusValue::Failed || awaiting_phase_update(session, c) {
            continue;
        }
        non_failed += 1;
        *phase_counts.entry(c.status.phase.to_string()).or_default() += 1;
    }
    let phase_percentages: BTreeMap<String, f64> = [
        Phase::None,
        Phase::PoweringOn,
        Phase::PoweringOff,
        Phase::Configuring,
    ]
    .iter()
    .map(|phase| {
        let count = phase_counts.get(&phase.to_string()).copied().unwrap_or(0);
        let pct = if non_failed == 0 {
            0.0
        } else {
            count as f64 / non_failed as f64 * 100.0
        };
        (phase.to_string(), pct)
    })
    .collect();

    let mut error_summary: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (_, c) in &owned {
        if !c.error.is_empty() {
            error_summary.entry(c.error.clone()).or_default().push(c.id.clone());
        }
    }
    if !session.status.skipped_ids.is_empty() {
        error_summary
            .entry("unknown component id".to_string())
            .or_default()
            .extend(session.status.skipped_ids.iter().cloned());
    }

    let percent = |count: usize| {
        if eligible == 0 {
            0.0
        } else {
            count as f64 / eligible as f64 * 100.0
        }
    };
    let terminal = owned
        .iter()
        .all(|(_, c)| is_done(session, c) || c.status.effective() == StatusValue::Failed);

    Ok(SessionStatusReport {
        status: session.status.status,
        managed_count: total,
        phase_percentages,
        percent_complete: percent(done_count),
        percent_failed: percent(failed.len()),
        error_summary,
        terminal,
        component_keys: owned.into_iter().map(|(k, _)| k).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosd_domain::ComponentActualState;
    use bosd_store::{record_key, typed, InMemoryStore};
    use chrono::Utc;

    async fn seed(store: &InMemoryStore, session: &str, id: &str, status: StatusValue) {
        let mut c = Component::new(id, "");
        c.session = session.to_string();
        c.status.status = status;
        if status == StatusValue::Stable {
            // A genuinely stable component runs what it declares.
            c.actual_state = Some(ComponentActualState {
                boot_artifacts: c.desired_state.boot_artifacts.clone(),
                configuration: String::new(),
                bss_token: String::new(),
                last_updated: Utc::now(),
            });
        }
        typed::put_as(store, Kind::Components, &record_key("", id), &c)
            .await
            .unwrap();
    }

    fn boot_session(name: &str) -> Session {
        let mut s = Session::new(name, "", "tpl", Operation::Boot, Utc::now());
        s.status.status = SessionState::Running;
        s
    }

    #[tokio::test]
    async fn all_stable_is_terminal_and_complete() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;
        seed(&store, "s1", "x2", StatusValue::Stable).await;

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        assert_eq!(report.managed_count, 2);
        assert_eq!(report.percent_complete, 100.0);
        assert_eq!(report.percent_failed, 0.0);
        assert!(report.terminal);
    }

    #[tokio::test]
    async fn in_flight_components_hold_the_session_open() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;
        seed(&store, "s1", "x2", StatusValue::PowerOnCalled).await;

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        assert_eq!(report.percent_complete, 50.0);
        assert!(!report.terminal);
    }

    #[tokio::test]
    async fn awaiting_components_are_excluded_from_completion_denominators() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;

        // Freshly stamped by session setup: stable status, declared
        // artifacts not yet observed, no status-operator pass yet.
        let mut c = Component::new("x2", "");
        c.session = "s1".into();
        c.status.status = StatusValue::Stable;
        c.desired_state.boot_artifacts.kernel = "k".into();
        c.desired_state.boot_artifacts.initrd = "i".into();
        typed::put_as(&store, Kind::Components, "/x2", &c).await.unwrap();

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        assert_eq!(report.managed_count, 2);
        assert_eq!(
            report.percent_complete, 100.0,
            "a component awaiting its phase update must not dilute the denominator"
        );
        assert_eq!(report.percent_failed, 0.0);
        assert!(!report.terminal, "the awaiting component still has work coming");
    }

    #[tokio::test]
    async fn failed_components_terminate_but_count_as_failed() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;
        seed(&store, "s1", "x2", StatusValue::Failed).await;

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        assert_eq!(report.percent_complete, 50.0);
        assert_eq!(report.percent_failed, 50.0);
        assert!(report.terminal, "failed components do not hold a session open");
    }

    #[tokio::test]
    async fn failed_components_are_excluded_from_phase_denominators() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;
        seed(&store, "s1", "x2", StatusValue::Failed).await;

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        // One non-failed component, in phase "none".
        assert_eq!(report.phase_percentages["none"], 100.0);
    }

    #[tokio::test]
    async fn shutdown_sessions_complete_on_off() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Off).await;

        let mut session = boot_session("s1");
        session.operation = Operation::Shutdown;
        let report = aggregate(&store, &session).await.unwrap();
        assert_eq!(report.percent_complete, 100.0);
        assert!(report.terminal);
    }

    #[tokio::test]
    async fn errors_group_by_message() {
        let store = InMemoryStore::new();
        let mut c1 = Component::new("x1", "");
        c1.session = "s1".into();
        c1.error = "BMC unreachable".into();
        let mut c2 = Component::new("x2", "");
        c2.session = "s1".into();
        c2.error = "BMC unreachable".into();
        typed::put_as(&store, Kind::Components, "/x1", &c1).await.unwrap();
        typed::put_as(&store, Kind::Components, "/x2", &c2).await.unwrap();

        let report = aggregate(&store, &boot_session("s1")).await.unwrap();
        assert_eq!(
            report.error_summary["BMC unreachable"],
            vec!["x1".to_string(), "x2".to_string()]
        );
    }

    #[tokio::test]
    async fn skipped_ids_surface_in_the_error_summary() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "good", StatusValue::Stable).await;

        let mut session = boot_session("s1");
        session.status.skipped_ids = vec!["bogus".to_string()];
        let report = aggregate(&store, &session).await.unwrap();
        assert_eq!(report.error_summary["unknown component id"], vec!["bogus".to_string()]);
    }

    #[tokio::test]
    async fn tenancy_scopes_the_scan() {
        let store = InMemoryStore::new();
        // Same id and session name under two tenants.
        let mut a = Component::new("n1", "a");
        a.session = "s1".into();
        a.status.status = StatusValue::Stable;
        a.actual_state = Some(ComponentActualState {
            boot_artifacts: a.desired_state.boot_artifacts.clone(),
            configuration: String::new(),
            bss_token: String::new(),
            last_updated: Utc::now(),
        });
        let mut b = Component::new("n1", "b");
        b.session = "s1".into();
        b.status.status = StatusValue::PowerOnCalled;
        typed::put_as(&store, Kind::Components, "a/n1", &a).await.unwrap();
        typed::put_as(&store, Kind::Components, "b/n1", &b).await.unwrap();

        let mut session = boot_session("s1");
        session.tenant = "a".into();
        let report = aggregate(&store, &session).await.unwrap();
        assert_eq!(report.managed_count, 1);
        assert!(report.terminal, "tenant b's in-flight n1 must be invisible to tenant a");
    }

    #[tokio::test]
    async fn aggregation_is_idempotent_over_a_quiescent_set() {
        let store = InMemoryStore::new();
        seed(&store, "s1", "x1", StatusValue::Stable).await;
        seed(&store, "s1", "x2", StatusValue::Failed).await;

        let session = boot_session("s1");
        let first = aggregate(&store, &session).await.unwrap();
        let second = aggregate(&store, &session).await.unwrap();
        assert_eq!(first, second);
    }
}
