/// The per-kind namespaces of the store. Each kind is its own table; keys
/// never collide across kinds or tenants by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Components,
    Sessions,
    SessionTemplates,
    Options,
    BssTokens,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Components,
        Kind::Sessions,
        Kind::SessionTemplates,
        Kind::Options,
        Kind::BssTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Components => "components",
            Kind::Sessions => "sessions",
            Kind::SessionTemplates => "session_templates",
            Kind::Options => "options",
            Kind::BssTokens => "bss_tokens",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key of the single options record.
pub const OPTIONS_KEY: &str = "global";

/// Key of the schema-version marker, stored in the options kind.
pub const SCHEMA_KEY: &str = "schema";

/// Build a tenant-prefixed record key. The empty tenant is a valid value
/// representing the untenanted bucket, so `""/"x1"` → `"/x1"`.
pub fn record_key(tenant: &str, id: &str) -> String {
    format!("{}/{}", tenant, id)
}

/// Prefix that selects every key belonging to one tenant.
pub fn tenant_prefix(tenant: &str) -> String {
    format!("{}/", tenant)
}

/// Split a stored key back into `(tenant, id)`.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once('/').unwrap_or(("", key))
}
