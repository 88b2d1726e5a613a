use serde_json::{json, Value};
use tracing::{info, warn};

use bosd_domain::Component;

use crate::error::StoreError;
use crate::kinds::{Kind, SCHEMA_KEY};
use crate::store::StateStore;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u64 = 2;
/// Oldest version this build knows how to upgrade from.
pub const MIN_SCHEMA_VERSION: u64 = 1;

const MIGRATION_PAGE: usize = 500;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub normalized: usize,
    pub deleted: usize,
    pub from_version: u64,
}

/// Reshape older records to the current schema. Runs at service startup,
/// before any operator touches the store.
///
/// - A fresh store is stamped with the current version.
/// - Version 1 stores get their component keys tenant-prefixed.
/// - Component records missing `tenant` are normalized to the empty tenant.
/// - Records that still fail to parse (e.g. an invalid `phase`) are deleted
///   with a logged reason; operators must never see them.
/// - Any other version is rejected outright.
pub async fn migrate(store: &dyn StateStore) -> Result<MigrationReport, StoreError> {
    let found = match store.get(Kind::Options, SCHEMA_KEY).await? {
        Some(v) => v["version"].as_u64().unwrap_or(0),
        None => {
            // Fresh store: stamp and return.
            store
                .put(Kind::Options, SCHEMA_KEY, json!({ "version": SCHEMA_VERSION }))
                .await?;
            info!(version = SCHEMA_VERSION, "stamped fresh store");
            return Ok(MigrationReport { from_version: SCHEMA_VERSION, ..Default::default() });
        }
    };

    if found > SCHEMA_VERSION || found < MIN_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found,
            min: MIN_SCHEMA_VERSION,
            max: SCHEMA_VERSION,
        });
    }

    let mut report = MigrationReport { from_version: found, ..Default::default() };

    if found < SCHEMA_VERSION {
        rekey_untenanted_components(store, &mut report).await?;
    }
    sanitize_components(store, &mut report).await?;

    if found != SCHEMA_VERSION {
        store
            .put(Kind::Options, SCHEMA_KEY, json!({ "version": SCHEMA_VERSION }))
            .await?;
    }
    info!(
        from = found,
        to = SCHEMA_VERSION,
        normalized = report.normalized,
        deleted = report.deleted,
        "store migration complete"
    );
    Ok(report)
}

/// Version-1 stores keyed components by bare id; rewrite them into the
/// untenanted bucket (`/<id>`).
async fn rekey_untenanted_components(
    store: &dyn StateStore,
    report: &mut MigrationReport,
) -> Result<(), StoreError> {
    let keys = store.list_keys(Kind::Components, "").await?;
    for key in keys {
        if key.contains('/') {
            continue;
        }
        if let Some(value) = store.get(Kind::Components, &key).await? {
            store
                .put(Kind::Components, &format!("/{}", key), value)
                .await?;
            store.delete(Kind::Components, &key).await?;
            report.normalized += 1;
        }
    }
    Ok(())
}

async fn sanitize_components(
    store: &dyn StateStore,
    report: &mut MigrationReport,
) -> Result<(), StoreError> {
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .list_page(Kind::Components, cursor.as_deref(), MIGRATION_PAGE)
            .await?;
        for (key, value) in &page.records {
            match repair(value) {
                Repair::Clean => {}
                Repair::Fixed(fixed) => {
                    store.put(Kind::Components, key, fixed).await?;
                    report.normalized += 1;
                }
                Repair::Unrepairable(reason) => {
                    warn!(key = %key, reason = %reason, "deleting unrepairable component record");
                    store.delete(Kind::Components, key).await?;
                    report.deleted += 1;
                }
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(())
}

enum Repair {
    Clean,
    Fixed(Value),
    Unrepairable(String),
}

fn repair(value: &Value) -> Repair {
    if serde_json::from_value::<Component>(value.clone()).is_ok() {
        return Repair::Clean;
    }
    if !value.is_object() {
        return Repair::Unrepairable("record is not a JSON object".into());
    }

    // Single known repair: a missing/null tenant collapses to the
    // untenanted bucket. Anything still unparseable afterwards is beyond
    // repair.
    let mut fixed = value.clone();
    if fixed.get("tenant").map_or(true, Value::is_null) {
        fixed["tenant"] = json!("");
    }
    match serde_json::from_value::<Component>(fixed.clone()) {
        Ok(_) => Repair::Fixed(fixed),
        Err(e) => Repair::Unrepairable(e.to_string()),
    }
}
