use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Timeouts, connection resets, 5xx — already retried with backoff
    /// inside the client before this surfaces.
    #[error("{service}: transient failure: {message}")]
    Transient { service: &'static str, message: String },

    #[error("{service}: unexpected status {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service}: response exceeded {limit} bytes")]
    ResponseTooLarge { service: &'static str, limit: usize },

    #[error("{service}: decode error: {message}")]
    Decode { service: &'static str, message: String },
}

impl ClientError {
    pub fn service(&self) -> &'static str {
        match self {
            ClientError::Transient { service, .. }
            | ClientError::Status { service, .. }
            | ClientError::ResponseTooLarge { service, .. }
            | ClientError::Decode { service, .. } => service,
        }
    }
}
