use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Retry attempts for transient failures. 5xx, connect errors and timeouts
/// retry with capped exponential backoff; 4xx never does.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;

fn backoff(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(8));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}

/// Per-call limits, drawn from the options snapshot by the caller.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

/// Shared HTTP plumbing for every external-service client: one base URL,
/// one service name for error context, bearer auth when the mesh requires
/// it, retry with backoff, and length-gated response decoding.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: &'static str,
    base: String,
    bearer: Option<String>,
    client: reqwest::Client,
}

impl ServiceClient {
    pub fn new(service: &'static str, base: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            service,
            base: base.into().trim_end_matches('/').to_string(),
            bearer,
            client: reqwest::Client::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get_json(&self, path: &str, policy: CallPolicy) -> Result<Value, ClientError> {
        self.request_json(reqwest::Method::GET, path, None, policy).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        policy: CallPolicy,
    ) -> Result<Value, ClientError> {
        self.request_json(reqwest::Method::POST, path, Some(body), policy).await
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: &Value,
        policy: CallPolicy,
    ) -> Result<Value, ClientError> {
        self.request_json(reqwest::Method::PUT, path, Some(body), policy).await
    }

    pub async fn patch_json(
        &self,
        path: &str,
        body: &Value,
        policy: CallPolicy,
    ) -> Result<Value, ClientError> {
        self.request_json(reqwest::Method::PATCH, path, Some(body), policy).await
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        policy: CallPolicy,
    ) -> Result<Value, ClientError> {
        let url = self.url(path);
        let mut last_transient = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt - 1)).await;
            }

            let mut req = self
                .client
                .request(method.clone(), &url)
                .timeout(policy.timeout);
            if let Some(token) = &self.bearer {
                req = req.bearer_auth(token);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_transient = e.to_string();
                    warn!(service = self.service, url = %url, attempt, error = %last_transient,
                        "request failed, will retry");
                    continue;
                }
            };

            let status = resp.status();
            if status.is_server_error() {
                last_transient = format!("server returned {}", status);
                warn!(service = self.service, url = %url, attempt, status = %status,
                    "server error, will retry");
                continue;
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ClientError::Status {
                    service: self.service,
                    status: status.as_u16(),
                    message,
                });
            }

            debug!(service = self.service, url = %url, status = %status, "request ok");
            return self.read_gated(resp, policy.max_response_bytes).await;
        }

        Err(ClientError::Transient {
            service: self.service,
            message: last_transient,
        })
    }

    /// Read the body in chunks, aborting once it grows past `limit` instead
    /// of buffering an arbitrarily large response before parsing.
    pub async fn read_gated(
        &self,
        mut resp: reqwest::Response,
        limit: usize,
    ) -> Result<Value, ClientError> {
        if let Some(len) = resp.content_length() {
            if len as usize > limit {
                return Err(ClientError::ResponseTooLarge {
                    service: self.service,
                    limit,
                });
            }
        }

        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| ClientError::Transient {
            service: self.service,
            message: e.to_string(),
        })? {
            if buf.len() + chunk.len() > limit {
                return Err(ClientError::ResponseTooLarge {
                    service: self.service,
                    limit,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        if buf.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&buf).map_err(|e| ClientError::Decode {
            service: self.service,
            message: e.to_string(),
        })
    }

    /// Fetch an arbitrary absolute URL (object-store manifest links live
    /// outside the service base).
    pub async fn get_absolute(
        &self,
        url: &str,
        policy: CallPolicy,
    ) -> Result<Value, ClientError> {
        let resp = self
            .client
            .get(url)
            .timeout(policy.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transient {
                service: self.service,
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: self.service,
                status: status.as_u16(),
                message,
            });
        }
        self.read_gated(resp, policy.max_response_bytes).await
    }
}

/// Hard ceiling on ids per request, applied inside every list-taking client
/// regardless of what the operators hand in.
pub const MAX_IDS_PER_CALL: usize = 2000;

/// Split `items` into bounded batches for external calls. An empty input
/// yields no batches at all, which is what keeps clients from ever sending
/// a collaborator an empty list.
pub fn batches<T: Clone>(items: &[T], cap: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    items.chunks(cap.max(1)).map(|c| c.to_vec()).collect()
}
