use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("store error: {0}")]
    Store(#[from] bosd_store::StoreError),

    #[error("client error: {0}")]
    Client(#[from] bosd_client::ClientError),

    #[error("internal operator error: {0}")]
    Internal(String),
}
