use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const TENANT_HEADER: &str = "Cray-Tenant-Name";

/// The caller's tenant, taken from the `Cray-Tenant-Name` header. An absent
/// header is the empty tenant — a valid namespace of its own, not an error.
pub struct Tenant(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        Ok(Tenant(tenant))
    }
}
