use crate::error::DomainError;

pub const MAX_NAME_LEN: usize = 127;

/// Validate a session/template name: non-empty, at most 127 characters,
/// restricted to `[A-Za-z0-9._-]`.
pub fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::InvalidName {
            name: name.to_string(),
            reason: "name is empty".into(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::InvalidName {
            name: name.to_string(),
            reason: format!("name exceeds {} characters", MAX_NAME_LEN),
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(DomainError::InvalidName {
            name: name.to_string(),
            reason: format!("illegal character {:?}", bad),
        });
    }
    Ok(())
}

/// Heuristic used by the `reject_nids` option: a selector that is a bare
/// number or a `nid`-prefixed number is almost certainly a numeric node id
/// rather than a hardware name.
pub fn looks_like_nid(selector: &str) -> bool {
    let digits = selector
        .strip_prefix("nid")
        .unwrap_or(selector);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
