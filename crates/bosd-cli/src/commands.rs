use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bosd_api::build_app;
use bosd_client::{Clients, Endpoints, StubClients};
use bosd_config::{load_config, ServiceConfig, StoreBackend};
use bosd_operator::{all_operators, run_operator, Env};
use bosd_store::{migrate, InMemoryStore, RedbStore, StateStore};
use tokio::sync::watch;
use tracing::{error, info};

fn open_store(config: &ServiceConfig) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Redb => Arc::new(
            RedbStore::open(&config.store.path)
                .with_context(|| format!("opening store at {}", config.store.path.display()))?,
        ),
    };
    Ok(store)
}

fn build_clients(config: &ServiceConfig, stub: bool) -> Clients {
    if stub {
        info!("using in-process stub collaborators");
        return Clients::stub(&StubClients::new());
    }
    let endpoints = Endpoints {
        pcs: config.endpoints.pcs.clone(),
        hsm: config.endpoints.hsm.clone(),
        bss: config.endpoints.bss.clone(),
        ims: config.endpoints.ims.clone(),
        cfs: config.endpoints.cfs.clone(),
        s3_gateway: config.endpoints.s3_gateway.clone(),
        tapms: config.endpoints.tapms.clone(),
    };
    Clients::http(&endpoints, config.bearer_token.clone())
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

pub async fn serve(
    config_path: Option<PathBuf>,
    stub_clients: bool,
    bind_override: Option<String>,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let bind = bind_override.unwrap_or_else(|| config.bind.clone());

    let store = open_store(&config)?;
    let report = migrate(store.as_ref())
        .await
        .context("store schema migration failed")?;
    info!(
        normalized = report.normalized,
        deleted = report.deleted,
        "store ready"
    );

    let clients = build_clients(&config, stub_clients);
    let env = Env::new(store, clients, Some(config.liveness_dir.clone()));

    // Shutdown fan-out: one watch channel observed by every operator task
    // and the server. On signal, in-flight batches complete and everything
    // exits.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut operator_handles = Vec::new();
    for op in all_operators() {
        let name = op.name();
        info!(operator = name, "spawning operator");
        operator_handles.push(tokio::spawn(run_operator(
            env.clone(),
            op,
            shutdown_rx.clone(),
        )));
    }

    let app = build_app(env);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!(bind = %bind, "serving the v2 REST surface");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server exited with error");
        }
    });

    wait_for_shutdown().await.context("signal handler failed")?;
    info!("shutdown requested, draining operators");
    let _ = shutdown_tx.send(true);

    for handle in operator_handles {
        let _ = handle.await;
    }
    let _ = server.await;
    info!("bosd stopped");
    Ok(())
}

pub async fn migrate_store(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let store = open_store(&config)?;
    let report = migrate(store.as_ref())
        .await
        .context("store schema migration failed")?;
    println!(
        "migrated from schema version {}: {} normalized, {} deleted",
        report.from_version, report.normalized, report.deleted
    );
    Ok(())
}
