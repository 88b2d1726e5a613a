use bosd_domain::{validate_name, OptionsSnapshot, SessionTemplate};

use crate::error::ApiError;

/// Creation-time session checks the operators rely on having already
/// happened: a legal name and, when the deployment demands it, a limit.
pub fn validate_session_request(
    name: &str,
    limit: &str,
    opts: &OptionsSnapshot,
) -> Result<(), ApiError> {
    validate_name(name)?;
    if opts.session_limit_required && limit.is_empty() {
        return Err(ApiError::bad_request(
            "a session limit is required but none was given",
        ));
    }
    Ok(())
}

/// Structural template validation; IMS existence checks are the setup
/// operator's business because they need a live collaborator.
pub fn validate_template(template: &SessionTemplate) -> Result<(), ApiError> {
    template.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosd_domain::BootSet;
    use std::collections::BTreeMap;

    #[test]
    fn limit_requirement_is_enforced() {
        let opts = OptionsSnapshot {
            session_limit_required: true,
            ..Default::default()
        };
        assert!(validate_session_request("s1", "", &opts).is_err());
        assert!(validate_session_request("s1", "x1", &opts).is_ok());
    }

    #[test]
    fn bad_names_are_rejected() {
        let opts = OptionsSnapshot::default();
        assert!(validate_session_request("bad name", "", &opts).is_err());
        assert!(validate_session_request(&"x".repeat(200), "", &opts).is_err());
    }

    #[test]
    fn template_without_selectors_is_rejected() {
        let mut boot_sets = BTreeMap::new();
        boot_sets.insert("compute".to_string(), BootSet::default());
        let template = SessionTemplate {
            name: "tpl".into(),
            boot_sets,
            ..Default::default()
        };
        assert!(validate_template(&template).is_err());
    }
}
