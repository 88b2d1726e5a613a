use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {kind}/{key}")]
    NotFound { kind: &'static str, key: String },

    #[error("concurrent modification of {key} did not settle")]
    Conflict { key: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Raised by a patch mutator to abort the read-modify-write cycle.
    #[error("patch rejected: {0}")]
    PatchRejected(String),

    #[error("unsupported schema version {found}, supported {min}..={max}")]
    SchemaVersion { found: u64, min: u64, max: u64 },

    #[error("internal store error: {0}")]
    Internal(String),
}
