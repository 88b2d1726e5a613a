use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::kinds::Kind;

/// A pure read-modify-write function submitted to [`StateStore::patch`].
///
/// Mutators must be idempotent and assume nothing beyond the snapshot they
/// are handed; the store may call them more than once when a concurrent
/// writer invalidates the snapshot.
pub type Mutator<'a> = &'a (dyn Fn(Value) -> Result<Value, StoreError> + Send + Sync);

/// One page of a keyed scan, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<(String, Value)>,
    /// Cursor for the next page; `None` when the scan is exhausted.
    pub next: Option<String>,
}

/// A keyed document store: one JSON hash per record, per-kind namespaces,
/// atomic single-record updates. No cross-record transactions exist — the
/// `patch` primitive is the only safety mechanism the operators rely on.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, kind: Kind, key: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch several records at once; missing keys are simply absent from
    /// the result map.
    async fn get_multi(
        &self,
        kind: Kind,
        keys: &[String],
    ) -> Result<HashMap<String, Value>, StoreError>;

    async fn put(&self, kind: Kind, key: &str, value: Value) -> Result<(), StoreError>;

    /// Atomic read-modify-write with optimistic locking: the record is read,
    /// the mutator applied, and the result written only if no concurrent
    /// modification happened in between; otherwise the cycle retries.
    async fn patch(&self, kind: Kind, key: &str, mutator: Mutator<'_>)
        -> Result<Value, StoreError>;

    async fn delete(&self, kind: Kind, key: &str) -> Result<(), StoreError>;

    async fn list_keys(&self, kind: Kind, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Read one page of records ordered by key, starting strictly after
    /// `cursor`. Callers stream the whole kind by feeding `Page::next` back.
    async fn list_page(
        &self,
        kind: Kind,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError>;
}
