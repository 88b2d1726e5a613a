use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::http::{CallPolicy, ServiceClient};

#[async_trait]
pub trait TenantService: Send + Sync + 'static {
    /// Node ids owned by `tenant`. The empty tenant owns everything, so
    /// callers skip this lookup for the untenanted bucket.
    async fn owned_nodes(
        &self,
        tenant: &str,
        policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError>;
}

pub struct HttpTenantService {
    inner: ServiceClient,
}

impl HttpTenantService {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("tapms", base, bearer),
        }
    }
}

#[async_trait]
impl TenantService for HttpTenantService {
    async fn owned_nodes(
        &self,
        tenant: &str,
        policy: CallPolicy,
    ) -> Result<HashSet<String>, ClientError> {
        let resp = match self
            .inner
            .get_json(&format!("/tenants/{}", tenant), policy)
            .await
        {
            Ok(v) => v,
            // Unknown tenant owns nothing.
            Err(ClientError::Status { status: 404, .. }) => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };

        let mut owned = HashSet::new();
        if let Some(resources) = resp["spec"]["tenantresources"].as_array() {
            for resource in resources {
                if let Some(xnames) = resource["xnames"].as_array() {
                    owned.extend(xnames.iter().filter_map(|v| v.as_str()).map(String::from));
                }
            }
        }
        Ok(owned)
    }
}
