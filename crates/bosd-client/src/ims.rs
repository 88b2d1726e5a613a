use async_trait::async_trait;
use bosd_domain::Arch;
use serde_json::json;

use crate::error::ClientError;
use crate::http::{CallPolicy, ServiceClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub arch: Arch,
    /// Object-store URL of the image manifest.
    pub manifest_link: String,
}

#[async_trait]
pub trait ImageService: Send + Sync + 'static {
    /// `Ok(None)` means the image id is simply unknown — callers decide
    /// whether that is fatal via the `ims_images_must_exist` option.
    async fn get_image(&self, id: &str, policy: CallPolicy)
        -> Result<Option<Image>, ClientError>;

    async fn tag_image(
        &self,
        id: &str,
        key: &str,
        value: &str,
        policy: CallPolicy,
    ) -> Result<(), ClientError>;
}

/// Derive the image id from a boot-set manifest path. Manifests live at
/// `s3://<bucket>/<image-id>/manifest.json`; anything else yields `None`.
pub fn image_id_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("s3://")?;
    let mut segments = rest.split('/');
    let _bucket = segments.next()?;
    let id = segments.next()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

pub struct HttpImageService {
    inner: ServiceClient,
}

impl HttpImageService {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("ims", base, bearer),
        }
    }
}

#[async_trait]
impl ImageService for HttpImageService {
    async fn get_image(
        &self,
        id: &str,
        policy: CallPolicy,
    ) -> Result<Option<Image>, ClientError> {
        let resp = match self.inner.get_json(&format!("/images/{}", id), policy).await {
            Ok(v) => v,
            Err(ClientError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let arch = match resp["arch"].as_str() {
            Some("aarch64") => Arch::Arm,
            Some("x86_64") | None => Arch::X86,
            Some(_) => Arch::Other,
        };
        Ok(Some(Image {
            id: resp["id"].as_str().unwrap_or(id).to_string(),
            arch,
            manifest_link: resp["link"]["path"].as_str().unwrap_or_default().to_string(),
        }))
    }

    async fn tag_image(
        &self,
        id: &str,
        key: &str,
        value: &str,
        policy: CallPolicy,
    ) -> Result<(), ClientError> {
        let body = json!({
            "metadata": { "operation": "set", "key": key, "value": value }
        });
        self.inner
            .patch_json(&format!("/images/{}", id), &body, policy)
            .await?;
        Ok(())
    }
}
