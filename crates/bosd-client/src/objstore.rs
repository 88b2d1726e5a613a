use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientError;
use crate::http::{CallPolicy, ServiceClient};

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch and decode an image manifest. Decoding is length-gated: the
    /// body is abandoned with `ResponseTooLarge` once it grows past
    /// `policy.max_response_bytes`, so a corrupt or hostile manifest cannot
    /// balloon memory.
    async fn fetch_manifest(&self, url: &str, policy: CallPolicy) -> Result<Value, ClientError>;
}

/// Object-store access over the S3 HTTP gateway. `s3://bucket/key` links
/// are rewritten onto the gateway base URL.
pub struct HttpObjectStore {
    inner: ServiceClient,
}

impl HttpObjectStore {
    pub fn new(gateway_base: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new("s3", gateway_base, None),
        }
    }

    fn gateway_url(&self, url: &str) -> String {
        match url.strip_prefix("s3://") {
            Some(rest) => self.inner.url(&format!("/{}", rest)),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch_manifest(&self, url: &str, policy: CallPolicy) -> Result<Value, ClientError> {
        self.inner.get_absolute(&self.gateway_url(url), policy).await
    }
}
