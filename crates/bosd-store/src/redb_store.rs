use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use crate::error::StoreError;
use crate::kinds::Kind;
use crate::store::{Mutator, Page, StateStore};

const COMPONENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("components");
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const SESSION_TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("session_templates");
const OPTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("options");
const BSS_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("bss_tokens");

fn table_def(kind: Kind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        Kind::Components => COMPONENTS,
        Kind::Sessions => SESSIONS,
        Kind::SessionTemplates => SESSION_TEMPLATES,
        Kind::Options => OPTIONS,
        Kind::BssTokens => BSS_TOKENS,
    }
}

fn internal(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Persistent state store backed by a redb database file.
///
/// One table per kind, JSON bytes per record. Write transactions are
/// serialized by redb, so a `patch` performed inside a single write
/// transaction observes and replaces the record atomically — the optimistic
/// retry loop of the in-memory store degenerates to a single pass here.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`.
    ///
    /// Parent directories are created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        // Ensure tables exist
        {
            let wtxn = db.begin_write().map_err(internal)?;
            for kind in Kind::ALL {
                wtxn.open_table(table_def(kind)).map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl StateStore for RedbStore {
    async fn get(&self, kind: Kind, key: &str) -> Result<Option<Value>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table_def(kind)).map_err(internal)?;
        match table.get(key).map_err(internal)? {
            Some(guard) => {
                let value: Value = serde_json::from_slice(guard.value())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn get_multi(
        &self,
        kind: Kind,
        keys: &[String],
    ) -> Result<std::collections::HashMap<String, Value>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table_def(kind)).map_err(internal)?;
        let mut out = std::collections::HashMap::new();
        for key in keys {
            if let Some(guard) = table.get(key.as_str()).map_err(internal)? {
                let value: Value = serde_json::from_slice(guard.value())?;
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    async fn put(&self, kind: Kind, key: &str, value: Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&value)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(table_def(kind)).map_err(internal)?;
            table.insert(key, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn patch(
        &self,
        kind: Kind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> Result<Value, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let updated = {
            let mut table = wtxn.open_table(table_def(kind)).map_err(internal)?;
            let current: Value = match table.get(key).map_err(internal)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => {
                    return Err(StoreError::NotFound {
                        kind: kind.as_str(),
                        key: key.to_string(),
                    })
                }
            };
            let updated = mutator(current)?;
            let bytes = serde_json::to_vec(&updated)?;
            table.insert(key, bytes.as_slice()).map_err(internal)?;
            updated
        };
        wtxn.commit().map_err(internal)?;
        Ok(updated)
    }

    async fn delete(&self, kind: Kind, key: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(table_def(kind)).map_err(internal)?;
            table.remove(key).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_keys(&self, kind: Kind, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table_def(kind)).map_err(internal)?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (k, _v) = entry.map_err(internal)?;
            let k = k.value();
            if k.starts_with(prefix) {
                keys.push(k.to_string());
            }
        }
        Ok(keys)
    }

    async fn list_page(
        &self,
        kind: Kind,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table_def(kind)).map_err(internal)?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (k, v) = entry.map_err(internal)?;
            let k = k.value();
            if let Some(c) = cursor {
                if k <= c {
                    continue;
                }
            }
            let value: Value = serde_json::from_slice(v.value())?;
            records.push((k.to_string(), value));
            if records.len() == page_size {
                break;
            }
        }
        let next = if records.len() == page_size {
            records.last().map(|(k, _)| k.clone())
        } else {
            None
        };
        Ok(Page { records, next })
    }
}
