#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::component::*;
    use crate::naming::{looks_like_nid, validate_name};
    use crate::session::*;

    #[test]
    fn boot_artifacts_empty_only_without_kernel_and_initrd() {
        assert!(BootArtifacts::default().is_empty());
        let a = BootArtifacts { kernel: "k".into(), ..Default::default() };
        assert!(!a.is_empty());
        let b = BootArtifacts { initrd: "i".into(), ..Default::default() };
        assert!(!b.is_empty());
    }

    #[test]
    fn last_action_record_bumps_attempts_for_same_kind() {
        let mut la = LastAction::default();
        la.record(ActionKind::PowerOn, Utc::now());
        la.record(ActionKind::PowerOn, Utc::now());
        assert_eq!(la.num_attempts, 2);
        assert_eq!(la.action, ActionKind::PowerOn);
    }

    #[test]
    fn last_action_record_resets_attempts_on_kind_change() {
        let mut la = LastAction::default();
        la.record(ActionKind::PowerOn, Utc::now());
        la.record(ActionKind::PowerOffGracefully, Utc::now());
        assert_eq!(la.num_attempts, 1);
        assert_eq!(la.action, ActionKind::PowerOffGracefully);
    }

    #[test]
    fn derive_status_powering_on() {
        let mut la = LastAction::default();
        assert_eq!(derive_status(Phase::PoweringOn, &la), StatusValue::PowerOnPending);
        la.record(ActionKind::PowerOn, Utc::now());
        assert_eq!(derive_status(Phase::PoweringOn, &la), StatusValue::PowerOnCalled);
    }

    #[test]
    fn derive_status_powering_off_escalation() {
        let mut la = LastAction::default();
        assert_eq!(derive_status(Phase::PoweringOff, &la), StatusValue::PowerOffPending);
        la.record(ActionKind::PowerOffGracefully, Utc::now());
        assert_eq!(
            derive_status(Phase::PoweringOff, &la),
            StatusValue::PowerOffGracefullyCalled
        );
        la.record(ActionKind::PowerOffForcefully, Utc::now());
        assert_eq!(
            derive_status(Phase::PoweringOff, &la),
            StatusValue::PowerOffForcefullyCalled
        );
    }

    #[test]
    fn derive_status_failed_wins() {
        let mut la = LastAction::default();
        la.record(ActionKind::PowerOn, Utc::now());
        la.failed = true;
        assert_eq!(derive_status(Phase::PoweringOn, &la), StatusValue::Failed);
    }

    #[test]
    fn status_override_wins() {
        let status = ComponentStatus {
            phase: Phase::None,
            status: StatusValue::Stable,
            status_override: Some(StatusValue::On),
        };
        assert_eq!(status.effective(), StatusValue::On);
    }

    #[test]
    fn retry_limit_prefers_component_policy() {
        let mut c = Component::new("x1", "");
        assert_eq!(c.retry_limit(3), 3);
        c.retry_policy = Some(7);
        assert_eq!(c.retry_limit(3), 7);
    }

    #[test]
    fn valid_names() {
        assert!(validate_name("session-1").is_ok());
        assert!(validate_name("a.b_c-d").is_ok());
        assert!(validate_name(&"a".repeat(127)).is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(128)).is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("slash/name").is_err());
    }

    #[test]
    fn nid_heuristic() {
        assert!(looks_like_nid("001234"));
        assert!(looks_like_nid("nid000001"));
        assert!(!looks_like_nid("x1000c0s0b0n0"));
        assert!(!looks_like_nid("nid"));
    }

    fn template_with(bs: BootSet) -> SessionTemplate {
        let mut boot_sets = BTreeMap::new();
        boot_sets.insert("compute".to_string(), bs);
        SessionTemplate {
            name: "tpl".into(),
            boot_sets,
            ..Default::default()
        }
    }

    #[test]
    fn template_without_selector_is_invalid() {
        let tpl = template_with(BootSet::default());
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn template_with_node_list_is_valid() {
        let tpl = template_with(BootSet {
            node_list: vec!["x1".into()],
            ..Default::default()
        });
        assert!(tpl.validate().is_ok());
    }

    #[test]
    fn template_boot_set_name_must_match_key() {
        let tpl = template_with(BootSet {
            name: "other".into(),
            node_list: vec!["x1".into()],
            ..Default::default()
        });
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn template_unknown_arch_is_invalid() {
        let tpl = template_with(BootSet {
            node_list: vec!["x1".into()],
            arch: Arch::Unknown,
            ..Default::default()
        });
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn component_round_trips_json() {
        let mut c = Component::new("x1000c0s0b0n0", "vcluster-a");
        c.desired_state.boot_artifacts.kernel = "s3://boot/kernel".into();
        c.session = "s1".into();
        let json = serde_json::to_string(&c).unwrap();
        let back: Component = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn session_serializes_operation_lowercase() {
        let s = Session::new("s1", "", "tpl", Operation::Reboot, Utc::now());
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["operation"], "reboot");
        assert_eq!(v["status"]["status"], "pending");
    }
}
