use async_trait::async_trait;
use bosd_domain::BootArtifacts;
use serde_json::json;

use crate::error::ClientError;
use crate::http::{CallPolicy, ServiceClient};

#[async_trait]
pub trait BootScript: Send + Sync + 'static {
    /// Register the boot parameters for a batch of nodes under a referral
    /// token. On network boot the nodes hand the token back and receive
    /// these parameters.
    async fn set_boot_params(
        &self,
        ids: &[String],
        artifacts: &BootArtifacts,
        referral_token: &str,
        policy: CallPolicy,
    ) -> Result<(), ClientError>;
}

pub struct HttpBootScript {
    inner: ServiceClient,
}

impl HttpBootScript {
    pub fn new(base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            inner: ServiceClient::new("bss", base, bearer),
        }
    }
}

#[async_trait]
impl BootScript for HttpBootScript {
    async fn set_boot_params(
        &self,
        ids: &[String],
        artifacts: &BootArtifacts,
        referral_token: &str,
        policy: CallPolicy,
    ) -> Result<(), ClientError> {
        let params = if artifacts.kernel_parameters.is_empty() {
            format!("bos_session_token={}", referral_token)
        } else {
            format!("{} bos_session_token={}", artifacts.kernel_parameters, referral_token)
        };
        let body = json!({
            "hosts": ids,
            "kernel": artifacts.kernel,
            "initrd": artifacts.initrd,
            "params": params,
        });
        self.inner.put_json("/bootparameters", &body, policy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn boot_params_carry_referral_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bootparameters"))
            .and(body_partial_json(json!({
                "hosts": ["x1"],
                "kernel": "s3://boot/kernel",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bss = HttpBootScript::new(server.uri(), None);
        let artifacts = BootArtifacts {
            kernel: "s3://boot/kernel".into(),
            initrd: "s3://boot/initrd".into(),
            kernel_parameters: "console=ttyS0".into(),
            ..Default::default()
        };
        bss.set_boot_params(
            &["x1".to_string()],
            &artifacts,
            "tok-1",
            CallPolicy {
                timeout: Duration::from_secs(2),
                max_response_bytes: 1 << 20,
            },
        )
        .await
        .unwrap();
    }
}
