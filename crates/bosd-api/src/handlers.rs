use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bosd_domain::{
    validate_name, Component, Operation, OptionsSnapshot, Session, SessionTemplate,
};
use bosd_operator::{aggregate, apply_staged};
use bosd_store::{record_key, typed, Kind, StoreError, OPTIONS_KEY};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::Tenant;
use crate::validate::{validate_session_request, validate_template};

const SCAN_PAGE: usize = 500;

// ── Service meta ──────────────────────────────────────────────────────────────

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "bosd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn healthz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // The service is live iff its store answers.
    state
        .env
        .store
        .get(Kind::Options, OPTIONS_KEY)
        .await
        .map_err(|e| ApiError::unavailable(e.to_string()))?;
    Ok(Json(json!({ "status": "up" })))
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// RFC 7386 style merge: objects merge recursively, null deletes, anything
/// else replaces.
fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    base.remove(k);
                } else {
                    merge_json(base.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Merge `patch` into the record at `key`, keeping the identity fields
/// pinned and insisting the result still parses as a `T`.
async fn merge_patch_record<T: serde::de::DeserializeOwned>(
    state: &AppState,
    kind: Kind,
    key: &str,
    patch: Value,
    pinned: &[&str],
) -> Result<Value, ApiError> {
    let result = state
        .env
        .store
        .patch(kind, key, &|mut current| {
            let originals: Vec<(String, Value)> = pinned
                .iter()
                .map(|f| (f.to_string(), current[*f].clone()))
                .collect();
            merge_json(&mut current, &patch);
            for (field, value) in originals {
                current[field.as_str()] = value;
            }
            if let Err(e) = serde_json::from_value::<T>(current.clone()) {
                return Err(StoreError::PatchRejected(e.to_string()));
            }
            Ok(current)
        })
        .await;
    match result {
        Ok(v) => Ok(v),
        Err(StoreError::PatchRejected(reason)) => Err(ApiError::bad_request(reason)),
        Err(e) => Err(e.into()),
    }
}

/// Page through a kind collecting the caller's tenant's records.
async fn scan_tenant<T: serde::de::DeserializeOwned>(
    state: &AppState,
    kind: Kind,
    tenant: &str,
) -> Result<Vec<T>, ApiError> {
    let prefix = bosd_store::tenant_prefix(tenant);
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = state
            .env
            .store
            .list_page(kind, cursor.as_deref(), SCAN_PAGE)
            .await?;
        for (key, value) in page.records {
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Ok(record) = serde_json::from_value(value) {
                out.push(record);
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(out)
}

// ── Components ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ComponentsQuery {
    pub ids: Option<String>,
    pub session: Option<String>,
}

pub async fn list_components(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<ComponentsQuery>,
) -> Result<Json<Vec<Component>>, ApiError> {
    let mut components: Vec<Component> =
        scan_tenant(&state, Kind::Components, &tenant).await?;
    if let Some(ids) = &query.ids {
        let wanted: HashSet<&str> = ids.split(',').collect();
        components.retain(|c| wanted.contains(c.id.as_str()));
    }
    if let Some(session) = &query.session {
        components.retain(|c| &c.session == session);
    }
    Ok(Json(components))
}

pub async fn create_component(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<Component>), ApiError> {
    if !body.is_object() {
        return Err(ApiError::bad_request("component body must be an object"));
    }
    let id = body["id"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("component id is required"))?
        .to_string();

    body["tenant"] = json!(tenant);
    let component: Component = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid component: {}", e)))?;

    let key = record_key(&tenant, &id);
    if state.env.store.get(Kind::Components, &key).await?.is_some() {
        return Err(ApiError::conflict(format!("component '{}' already exists", id)));
    }
    typed::put_as(state.env.store.as_ref(), Kind::Components, &key, &component).await?;
    Ok((StatusCode::CREATED, Json(component)))
}

pub async fn get_component(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Result<Json<Component>, ApiError> {
    let key = record_key(&tenant, &id);
    let component: Component = typed::get_as(state.env.store.as_ref(), Kind::Components, &key)
        .await?
        .ok_or_else(|| component_not_found(&tenant, &id))?;
    Ok(Json(component))
}

pub async fn patch_component(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let key = record_key(&tenant, &id);
    let updated = merge_patch_record::<Component>(
        &state,
        Kind::Components,
        &key,
        patch,
        &["id", "tenant"],
    )
    .await
    .map_err(|e| contextualize_missing(e, &tenant, &id))?;
    Ok(Json(updated))
}

pub async fn delete_component(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = record_key(&tenant, &id);
    if state.env.store.get(Kind::Components, &key).await?.is_none() {
        return Err(component_not_found(&tenant, &id));
    }
    state.env.store.delete(Kind::Components, &key).await?;
    state.env.store.delete(Kind::BssTokens, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkFilter {
    pub ids: Option<String>,
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkPatchBody {
    pub patch: Value,
    #[serde(default)]
    pub filter: BulkFilter,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkPatchQuery {
    #[serde(default)]
    pub skip_bad_ids: bool,
}

pub async fn bulk_patch_components(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<BulkPatchQuery>,
    Json(body): Json<BulkPatchBody>,
) -> Result<Json<Value>, ApiError> {
    let keys: Vec<String> = match (&body.filter.ids, &body.filter.session) {
        (Some(ids), None) => ids
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| record_key(&tenant, id))
            .collect(),
        (None, Some(session)) => scan_tenant::<Component>(&state, Kind::Components, &tenant)
            .await?
            .into_iter()
            .filter(|c| &c.session == session)
            .map(|c| record_key(&tenant, &c.id))
            .collect(),
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of filter.ids or filter.session is required",
            ))
        }
    };

    let mut patched = Vec::new();
    let mut skipped = Vec::new();
    for key in keys {
        match merge_patch_record::<Component>(
            &state,
            Kind::Components,
            &key,
            body.patch.clone(),
            &["id", "tenant"],
        )
        .await
        {
            Ok(_) => patched.push(bosd_store::split_key(&key).1.to_string()),
            Err(e) if e.status == StatusCode::NOT_FOUND => {
                if !query.skip_bad_ids {
                    return Err(ApiError::bad_request(format!(
                        "unknown component id '{}'",
                        bosd_store::split_key(&key).1
                    )));
                }
                skipped.push(bosd_store::split_key(&key).1.to_string());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Json(json!({ "patched": patched, "skipped": skipped })))
}

#[derive(Debug, Deserialize)]
pub struct ApplyStagedBody {
    pub xnames: Vec<String>,
}

pub async fn post_apply_staged(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<ApplyStagedBody>,
) -> Result<Json<Value>, ApiError> {
    if body.xnames.is_empty() {
        return Err(ApiError::bad_request("xnames must not be empty"));
    }
    let outcome = apply_staged(state.env.store.as_ref(), &tenant, &body.xnames).await?;
    Ok(Json(json!(outcome)))
}

fn component_not_found(tenant: &str, id: &str) -> ApiError {
    if tenant.is_empty() {
        ApiError::not_found(format!("component '{}' not found", id))
    } else {
        ApiError::not_found(format!("component '{}' not found for tenant '{}'", id, tenant))
    }
}

fn contextualize_missing(e: ApiError, tenant: &str, id: &str) -> ApiError {
    if e.status == StatusCode::NOT_FOUND {
        component_not_found(tenant, id)
    } else {
        e
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub name: Option<String>,
    pub template_name: String,
    pub operation: Operation,
    #[serde(default)]
    pub limit: String,
    #[serde(default)]
    pub stage: bool,
    #[serde(default)]
    pub include_disabled: bool,
}

pub async fn create_session(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let opts: OptionsSnapshot = state.env.options.snapshot().await;
    let name = body
        .name
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    validate_session_request(&name, &body.limit, &opts)?;
    validate_name(&body.template_name)?;

    // The template must exist for this tenant before a session may target it.
    let template_key = record_key(&tenant, &body.template_name);
    if state
        .env
        .store
        .get(Kind::SessionTemplates, &template_key)
        .await?
        .is_none()
    {
        return Err(ApiError::bad_request(format!(
            "session template '{}' does not exist",
            body.template_name
        )));
    }

    let key = record_key(&tenant, &name);
    if state.env.store.get(Kind::Sessions, &key).await?.is_some() {
        return Err(ApiError::conflict(format!("session '{}' already exists", name)));
    }

    let mut session = Session::new(&name, &tenant, &body.template_name, body.operation, Utc::now());
    session.limit = body.limit;
    session.stage = body.stage;
    session.include_disabled = body.include_disabled;
    typed::put_as(state.env.store.as_ref(), Kind::Sessions, &key, &session).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(scan_tenant(&state, Kind::Sessions, &tenant).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let key = record_key(&tenant, &name);
    let session: Session = typed::get_as(state.env.store.as_ref(), Kind::Sessions, &key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session '{}' not found", name)))?;
    Ok(Json(session))
}

pub async fn patch_session(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let key = record_key(&tenant, &name);
    let updated = merge_patch_record::<Session>(
        &state,
        Kind::Sessions,
        &key,
        patch,
        &["name", "tenant", "template_name", "operation"],
    )
    .await?;
    Ok(Json(updated))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = record_key(&tenant, &name);
    if state.env.store.get(Kind::Sessions, &key).await?.is_none() {
        return Err(ApiError::not_found(format!("session '{}' not found", name)));
    }
    state.env.store.delete(Kind::Sessions, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_session_status(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let key = record_key(&tenant, &name);
    let session: Session = typed::get_as(state.env.store.as_ref(), Kind::Sessions, &key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session '{}' not found", name)))?;

    let report = aggregate(state.env.store.as_ref(), &session).await?;
    let mut body = json!(report);
    body["start_time"] = json!(session.status.start_time);
    body["end_time"] = json!(session.status.end_time);
    body["error"] = json!(session.status.error);
    Ok(Json(body))
}

// ── Session templates ─────────────────────────────────────────────────────────

pub async fn create_template(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<SessionTemplate>), ApiError> {
    if !body.is_object() {
        return Err(ApiError::bad_request("session template body must be an object"));
    }
    body["tenant"] = json!(tenant);
    let template: SessionTemplate = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid session template: {}", e)))?;
    validate_template(&template)?;

    let key = record_key(&tenant, &template.name);
    if state
        .env
        .store
        .get(Kind::SessionTemplates, &key)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(format!(
            "session template '{}' already exists",
            template.name
        )));
    }
    typed::put_as(state.env.store.as_ref(), Kind::SessionTemplates, &key, &template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<SessionTemplate>>, ApiError> {
    Ok(Json(scan_tenant(&state, Kind::SessionTemplates, &tenant).await?))
}

pub async fn get_template(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<Json<SessionTemplate>, ApiError> {
    let key = record_key(&tenant, &name);
    let template: SessionTemplate =
        typed::get_as(state.env.store.as_ref(), Kind::SessionTemplates, &key)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("session template '{}' not found", name)))?;
    Ok(Json(template))
}

pub async fn patch_template(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let key = record_key(&tenant, &name);
    let updated = merge_patch_record::<SessionTemplate>(
        &state,
        Kind::SessionTemplates,
        &key,
        patch,
        &["name", "tenant"],
    )
    .await?;

    // The merged record must still be a valid template.
    let template: SessionTemplate = serde_json::from_value(updated.clone())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    validate_template(&template)?;
    Ok(Json(updated))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = record_key(&tenant, &name);
    if state
        .env
        .store
        .get(Kind::SessionTemplates, &key)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found(format!("session template '{}' not found", name)));
    }
    state.env.store.delete(Kind::SessionTemplates, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validate_stored_template(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let key = record_key(&tenant, &name);
    let template: SessionTemplate =
        typed::get_as(state.env.store.as_ref(), Kind::SessionTemplates, &key)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("session template '{}' not found", name)))?;
    validate_template(&template)?;
    Ok(Json(json!({ "valid": true })))
}

/// A starter template clients can copy and fill in.
pub async fn template_example() -> Json<Value> {
    Json(json!({
        "name": "example-template",
        "description": "Boot compute nodes with the example image",
        "enable_cfs": true,
        "boot_sets": {
            "compute": {
                "name": "compute",
                "node_roles_groups": ["Compute"],
                "arch": "X86",
                "kernel": "s3://boot-images/<image-id>/kernel",
                "initrd": "s3://boot-images/<image-id>/initrd",
                "kernel_parameters": "console=ttyS0,115200",
                "path": "s3://boot-images/<image-id>/manifest.json",
                "cfs_configuration": "compute-config",
                "rootfs_provider": "sbps",
            }
        }
    }))
}

// ── Options ───────────────────────────────────────────────────────────────────

pub async fn get_options(State(state): State<AppState>) -> Result<Json<OptionsSnapshot>, ApiError> {
    let stored = state
        .env
        .store
        .get(Kind::Options, OPTIONS_KEY)
        .await?
        .unwrap_or_else(|| json!({}));
    let snapshot: OptionsSnapshot = serde_json::from_value(stored)
        .map_err(|e| ApiError::internal(format!("stored options are malformed: {}", e)))?;
    Ok(Json(snapshot))
}

pub async fn patch_options(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Result<Json<OptionsSnapshot>, ApiError> {
    if !patch.is_object() {
        return Err(ApiError::bad_request("options patch must be an object"));
    }
    let mut stored = state
        .env
        .store
        .get(Kind::Options, OPTIONS_KEY)
        .await?
        .unwrap_or_else(|| json!({}));
    merge_json(&mut stored, &patch);

    let snapshot: OptionsSnapshot = serde_json::from_value(stored.clone())
        .map_err(|e| ApiError::bad_request(format!("invalid options: {}", e)))?;
    state
        .env
        .store
        .put(Kind::Options, OPTIONS_KEY, stored)
        .await?;
    Ok(Json(snapshot))
}
