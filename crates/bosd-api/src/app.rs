use axum::routing::{get, post};
use axum::Router;
use bosd_operator::Env;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(env: Env) -> Router {
    let state = AppState { env };

    Router::new()
        // Service meta
        .route("/", get(handlers::root))
        .route("/v2/healthz", get(handlers::healthz))
        .route("/v2/version", get(handlers::version))
        // Components
        .route(
            "/v2/components",
            get(handlers::list_components)
                .post(handlers::create_component)
                .patch(handlers::bulk_patch_components),
        )
        .route(
            "/v2/components/:id",
            get(handlers::get_component)
                .patch(handlers::patch_component)
                .delete(handlers::delete_component),
        )
        .route("/v2/applystaged", post(handlers::post_apply_staged))
        // Sessions
        .route(
            "/v2/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/v2/sessions/:name",
            get(handlers::get_session)
                .patch(handlers::patch_session)
                .delete(handlers::delete_session),
        )
        .route("/v2/sessions/:name/status", get(handlers::get_session_status))
        // Session templates
        .route(
            "/v2/sessiontemplates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route(
            "/v2/sessiontemplates/:name",
            get(handlers::get_template)
                .patch(handlers::patch_template)
                .delete(handlers::delete_template),
        )
        .route(
            "/v2/sessiontemplates/:name/validate",
            post(handlers::validate_stored_template),
        )
        .route("/v2/sessiontemplatetemplate", get(handlers::template_example))
        // Options
        .route(
            "/v2/options",
            get(handlers::get_options).patch(handlers::patch_options),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use bosd_client::{Clients, StubClients};
    use bosd_domain::{Component, Session, SessionState};
    use bosd_store::{typed, InMemoryStore, Kind};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn test_env() -> Env {
        Env::new(
            Arc::new(InMemoryStore::new()),
            Clients::stub(&StubClients::new()),
            None,
        )
    }

    fn test_app(env: &Env) -> Router {
        build_app(env.clone())
    }

    fn req(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        match body {
            Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn tenant_req(method: Method, uri: &str, tenant: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("Cray-Tenant-Name", tenant);
        match body {
            Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn template_body() -> Value {
        json!({
            "name": "tpl",
            "boot_sets": {
                "compute": {
                    "name": "compute",
                    "node_list": ["x1"],
                    "kernel": "s3://boot-images/img-1/kernel",
                    "initrd": "s3://boot-images/img-1/initrd",
                }
            }
        })
    }

    #[tokio::test]
    async fn healthz_is_up_with_a_working_store() {
        let env = test_env();
        let resp = test_app(&env)
            .oneshot(req(Method::GET, "/v2/healthz", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn version_reports_the_crate_version() {
        let env = test_env();
        let resp = test_app(&env)
            .oneshot(req(Method::GET, "/v2/version", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn component_crud_round_trip() {
        let env = test_env();
        let app = test_app(&env);

        let resp = app
            .clone()
            .oneshot(req(
                Method::POST,
                "/v2/components",
                Some(json!({ "id": "x1", "enabled": true })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(req(Method::GET, "/v2/components/x1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], "x1");

        let resp = app
            .clone()
            .oneshot(req(
                Method::PATCH,
                "/v2/components/x1",
                Some(json!({ "enabled": false })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["enabled"], false);

        let resp = app
            .clone()
            .oneshot(req(Method::DELETE, "/v2/components/x1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(req(Method::GET, "/v2/components/x1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_component_is_a_conflict() {
        let env = test_env();
        let app = test_app(&env);
        let body = json!({ "id": "x1" });

        let resp = app
            .clone()
            .oneshot(req(Method::POST, "/v2/components", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(req(Method::POST, "/v2/components", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn patch_cannot_move_a_component_between_tenants() {
        let env = test_env();
        let app = test_app(&env);

        app.clone()
            .oneshot(req(Method::POST, "/v2/components", Some(json!({ "id": "x1" }))))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(req(
                Method::PATCH,
                "/v2/components/x1",
                Some(json!({ "tenant": "vcluster-a" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["tenant"], "", "identity fields are pinned");
    }

    #[tokio::test]
    async fn tenants_see_only_their_components() {
        let env = test_env();
        let app = test_app(&env);

        app.clone()
            .oneshot(tenant_req(
                Method::POST,
                "/v2/components",
                "a",
                Some(json!({ "id": "n1" })),
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(tenant_req(
                Method::POST,
                "/v2/components",
                "b",
                Some(json!({ "id": "n1" })),
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(tenant_req(Method::GET, "/v2/components", "a", None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["tenant"], "a");

        // The untenanted bucket is empty.
        let resp = app
            .oneshot(req(Method::GET, "/v2/components", None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn bulk_patch_rejects_unknown_ids_unless_skipped() {
        let env = test_env();
        let app = test_app(&env);
        app.clone()
            .oneshot(req(Method::POST, "/v2/components", Some(json!({ "id": "x1" }))))
            .await
            .unwrap();

        let body = json!({
            "patch": { "enabled": false },
            "filter": { "ids": "x1,bogus" },
        });
        let resp = app
            .clone()
            .oneshot(req(Method::PATCH, "/v2/components", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(req(
                Method::PATCH,
                "/v2/components?skip_bad_ids=true",
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["patched"], json!(["x1"]));
        assert_eq!(body["skipped"], json!(["bogus"]));
    }

    #[tokio::test]
    async fn template_round_trip_is_canonical() {
        let env = test_env();
        let app = test_app(&env);

        let resp = app
            .clone()
            .oneshot(req(Method::POST, "/v2/sessiontemplates", Some(template_body())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;

        let resp = app
            .oneshot(req(Method::GET, "/v2/sessiontemplates/tpl", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched = body_json(resp).await;
        assert_eq!(created, fetched, "POST then GET must round-trip canonically");
    }

    #[tokio::test]
    async fn template_without_selectors_is_rejected() {
        let env = test_env();
        let body = json!({
            "name": "tpl",
            "boot_sets": { "compute": { "name": "compute" } }
        });
        let resp = test_app(&env)
            .oneshot(req(Method::POST, "/v2/sessiontemplates", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn template_example_is_served() {
        let env = test_env();
        let resp = test_app(&env)
            .oneshot(req(Method::GET, "/v2/sessiontemplatetemplate", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["boot_sets"].is_object());
    }

    #[tokio::test]
    async fn session_creation_requires_an_existing_template() {
        let env = test_env();
        let body = json!({ "template_name": "ghost", "operation": "boot" });
        let resp = test_app(&env)
            .oneshot(req(Method::POST, "/v2/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_creation_starts_pending() {
        let env = test_env();
        let app = test_app(&env);
        app.clone()
            .oneshot(req(Method::POST, "/v2/sessiontemplates", Some(template_body())))
            .await
            .unwrap();

        let body = json!({ "name": "s1", "template_name": "tpl", "operation": "reboot" });
        let resp = app
            .clone()
            .oneshot(req(Method::POST, "/v2/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["status"]["status"], "pending");
        assert_eq!(created["operation"], "reboot");

        let s: Session = typed::get_as(env.store.as_ref(), Kind::Sessions, "/s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.status.status, SessionState::Pending);
    }

    #[tokio::test]
    async fn invalid_operation_is_rejected_by_schema() {
        let env = test_env();
        let app = test_app(&env);
        app.clone()
            .oneshot(req(Method::POST, "/v2/sessiontemplates", Some(template_body())))
            .await
            .unwrap();

        let body = json!({ "name": "s1", "template_name": "tpl", "operation": "explode" });
        let resp = app
            .oneshot(req(Method::POST, "/v2/sessions", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn session_status_aggregates_components() {
        let env = test_env();
        let app = test_app(&env);
        app.clone()
            .oneshot(req(Method::POST, "/v2/sessiontemplates", Some(template_body())))
            .await
            .unwrap();
        app.clone()
            .oneshot(req(
                Method::POST,
                "/v2/sessions",
                Some(json!({ "name": "s1", "template_name": "tpl", "operation": "boot" })),
            ))
            .await
            .unwrap();

        // One stable component owned by the session, running what it declares.
        let mut c = Component::new("x1", "");
        c.session = "s1".into();
        c.status.status = bosd_domain::StatusValue::Stable;
        c.actual_state = Some(bosd_domain::ComponentActualState {
            boot_artifacts: c.desired_state.boot_artifacts.clone(),
            configuration: String::new(),
            bss_token: String::new(),
            last_updated: chrono::Utc::now(),
        });
        typed::put_as(env.store.as_ref(), Kind::Components, "/x1", &c)
            .await
            .unwrap();

        let resp = app
            .oneshot(req(Method::GET, "/v2/sessions/s1/status", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["managed_count"], 1);
        assert_eq!(body["percent_complete"], 100.0);
    }

    #[tokio::test]
    async fn options_patch_merges_and_round_trips() {
        let env = test_env();
        let app = test_app(&env);

        let resp = app
            .clone()
            .oneshot(req(
                Method::PATCH,
                "/v2/options",
                Some(json!({ "default_retry_policy": 7, "reject_nids": true })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(req(Method::GET, "/v2/options", None))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["default_retry_policy"], 7);
        assert_eq!(body["reject_nids"], true);
        // Untouched options keep their defaults.
        assert_eq!(body["polling_frequency_secs"], 15);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let env = test_env();
        let resp = test_app(&env)
            .oneshot(req(
                Method::PATCH,
                "/v2/options",
                Some(json!({ "default_retry_policy": "lots" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn apply_staged_promotes_and_reports() {
        let env = test_env();
        let app = test_app(&env);

        let mut c = Component::new("x1", "");
        c.staged_state.boot_artifacts.kernel = "k2".into();
        c.staged_state.boot_artifacts.initrd = "i2".into();
        typed::put_as(env.store.as_ref(), Kind::Components, "/x1", &c)
            .await
            .unwrap();

        let resp = app
            .oneshot(req(
                Method::POST,
                "/v2/applystaged",
                Some(json!({ "xnames": ["x1", "ghost"] })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["succeeded"], json!(["x1"]));
        assert!(body["errors"]["ghost"].is_string());
    }
}
