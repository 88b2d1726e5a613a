use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::kinds::Kind;
use crate::store::{Mutator, Page, StateStore};

/// A patch that loses the version race this many times in a row gives up.
const MAX_PATCH_RETRIES: usize = 16;

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    value: Value,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<Kind, BTreeMap<String, Versioned>>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests and stub-client dev
/// mode. Each record carries a version counter; `patch` applies its mutator
/// against a snapshot and commits only if the version is unchanged, so
/// concurrent patches serialize exactly like they do against a real backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, kind: Kind, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .tables
            .get(&kind)
            .and_then(|t| t.get(key))
            .map(|v| v.value.clone()))
    }

    async fn get_multi(
        &self,
        kind: Kind,
        keys: &[String],
    ) -> Result<HashMap<String, Value>, StoreError> {
        let guard = self.inner.read().await;
        let table = match guard.tables.get(&kind) {
            Some(t) => t,
            None => return Ok(HashMap::new()),
        };
        Ok(keys
            .iter()
            .filter_map(|k| table.get(k).map(|v| (k.clone(), v.value.clone())))
            .collect())
    }

    async fn put(&self, kind: Kind, key: &str, value: Value) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let table = guard.tables.entry(kind).or_default();
        let version = table.get(key).map(|v| v.version + 1).unwrap_or(0);
        table.insert(key.to_string(), Versioned { version, value });
        Ok(())
    }

    async fn patch(
        &self,
        kind: Kind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> Result<Value, StoreError> {
        for _ in 0..MAX_PATCH_RETRIES {
            // Snapshot outside the write lock; the mutator may be slow.
            let (seen_version, snapshot) = {
                let guard = self.inner.read().await;
                match guard.tables.get(&kind).and_then(|t| t.get(key)) {
                    Some(v) => (v.version, v.value.clone()),
                    None => {
                        return Err(StoreError::NotFound {
                            kind: kind.as_str(),
                            key: key.to_string(),
                        })
                    }
                }
            };

            let updated = mutator(snapshot)?;

            let mut guard = self.inner.write().await;
            let table = guard.tables.entry(kind).or_default();
            match table.get_mut(key) {
                Some(entry) if entry.version == seen_version => {
                    entry.version += 1;
                    entry.value = updated.clone();
                    return Ok(updated);
                }
                Some(_) => continue, // lost the race, re-read and retry
                None => {
                    return Err(StoreError::NotFound {
                        kind: kind.as_str(),
                        key: key.to_string(),
                    })
                }
            }
        }
        Err(StoreError::Conflict { key: key.to_string() })
    }

    async fn delete(&self, kind: Kind, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(table) = guard.tables.get_mut(&kind) {
            table.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, kind: Kind, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .tables
            .get(&kind)
            .map(|t| {
                t.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_page(
        &self,
        kind: Kind,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let guard = self.inner.read().await;
        let table = match guard.tables.get(&kind) {
            Some(t) => t,
            None => return Ok(Page::default()),
        };
        let records: Vec<(String, Value)> = table
            .iter()
            .filter(|(k, _)| cursor.map_or(true, |c| k.as_str() > c))
            .take(page_size)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        let next = if records.len() == page_size {
            records.last().map(|(k, _)| k.clone())
        } else {
            None
        };
        Ok(Page { records, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryStore::new();
        store
            .put(Kind::Components, "/x1", json!({"id": "x1"}))
            .await
            .unwrap();
        let got = store.get(Kind::Components, "/x1").await.unwrap();
        assert_eq!(got.unwrap()["id"], "x1");

        store.delete(Kind::Components, "/x1").await.unwrap();
        assert!(store.get(Kind::Components, "/x1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_multi_skips_missing_keys() {
        let store = InMemoryStore::new();
        store.put(Kind::Components, "/a", json!({})).await.unwrap();
        let got = store
            .get_multi(Kind::Components, &["/a".into(), "/missing".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(got.contains_key("/a"));
    }

    #[tokio::test]
    async fn patch_missing_key_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .patch(Kind::Components, "/nope", &|v| Ok(v))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_patches_serialize() {
        let store = InMemoryStore::new();
        store
            .put(Kind::Components, "/x1", json!({"count": 0}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .patch(Kind::Components, "/x1", &|mut v| {
                        let n = v["count"].as_u64().unwrap_or(0);
                        v["count"] = json!(n + 1);
                        Ok(v)
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let got = store.get(Kind::Components, "/x1").await.unwrap().unwrap();
        assert_eq!(got["count"], 20, "every mutator must be serialized in");
    }

    #[tokio::test]
    async fn list_keys_honours_prefix() {
        let store = InMemoryStore::new();
        store.put(Kind::Components, "a/n1", json!({})).await.unwrap();
        store.put(Kind::Components, "b/n1", json!({})).await.unwrap();
        store.put(Kind::Components, "/n1", json!({})).await.unwrap();

        let a = store.list_keys(Kind::Components, "a/").await.unwrap();
        assert_eq!(a, vec!["a/n1"]);

        let untenanted = store.list_keys(Kind::Components, "/").await.unwrap();
        assert_eq!(untenanted, vec!["/n1"]);
    }

    #[tokio::test]
    async fn paged_scan_walks_everything_once() {
        let store = InMemoryStore::new();
        for i in 0..7 {
            store
                .put(Kind::Components, &format!("/n{}", i), json!({"i": i}))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .list_page(Kind::Components, cursor.as_deref(), 3)
                .await
                .unwrap();
            seen.extend(page.records.iter().map(|(k, _)| k.clone()));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 7, "no key repeated or skipped");
    }

    #[tokio::test]
    async fn kinds_are_independent_namespaces() {
        let store = InMemoryStore::new();
        store.put(Kind::Components, "/k", json!({"kind": "c"})).await.unwrap();
        store.put(Kind::Sessions, "/k", json!({"kind": "s"})).await.unwrap();

        let c = store.get(Kind::Components, "/k").await.unwrap().unwrap();
        let s = store.get(Kind::Sessions, "/k").await.unwrap().unwrap();
        assert_eq!(c["kind"], "c");
        assert_eq!(s["kind"], "s");
    }
}
