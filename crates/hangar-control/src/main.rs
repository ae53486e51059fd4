//! Hangar control service binary.
//!
//! Loads deployments, serves the HTTP API and runs the idle-session sweep.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hangar_control::api::{self, AppState};
use hangar_control::{
    ClusterStackBackend, ControlConfig, DeploymentRegistry, EventEmitter, KubectlCluster,
    KvStackBackend, LocalDeploymentRegistry, ManifestSftpDirectory, ManifestStore, ProcessRunner,
    ProgramBuilder, SessionDeps, SessionManager, SessionRegistry, SessionSweeper,
    StackApplyEngine, StackBackend,
};
use hangar_state::StateProvider;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hangar_control=info".parse()?),
        )
        .init();

    info!("Hangar control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        storage_root = %config.storage.root.display(),
        namespace = %config.platform.namespace,
        "configuration loaded"
    );

    let state = StateProvider::from_config(&config.state).await?;
    let kv = state.kv()?;
    let events = EventEmitter::new(state.pubsub()?);

    let store = ManifestStore::new(config.storage.clone());
    let backend: Arc<dyn StackBackend> = if config.platform.actuate {
        Arc::new(ClusterStackBackend::new(
            kv.clone(),
            Arc::new(ProcessRunner::new(config.platform.command_timeout())),
            &config.platform,
        ))
    } else {
        warn!("cluster actuation disabled, stacks are only recorded");
        Arc::new(KvStackBackend::new(kv.clone()))
    };
    let engine = Arc::new(StackApplyEngine::new(
        backend,
        ProgramBuilder::new(&config.storage),
    ));

    let registry = Arc::new(LocalDeploymentRegistry::new(
        store.clone(),
        engine.clone(),
        events.clone(),
        &config.deployments,
    ));
    registry.load().await?;

    if config.platform.apply_on_startup {
        let result = registry.run_apply_all().await;
        match result.summary() {
            Some(summary) => info!(?summary, "startup apply complete"),
            None => warn!(
                error = result.error().unwrap_or_default(),
                "startup apply failed, continuing"
            ),
        }
    }

    let sessions = Arc::new(SessionManager::new(
        SessionDeps {
            registry: SessionRegistry::new(kv, config.sessions.record_ttl()),
            deployments: registry.clone(),
            engine,
            cluster: Arc::new(KubectlCluster::new(config.platform.kubectl.clone())),
            sftp: Arc::new(ManifestSftpDirectory::new(store)),
            events,
        },
        config.platform.clone(),
        config.sessions.clone(),
    ));

    let sweeper = SessionSweeper::new(sessions.clone());
    sweeper.start().await;

    let app = api::router(AppState {
        deployments: registry,
        sessions,
    });

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown");
        cancel_on_signal.cancel();
    });

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(address = %config.server.listen_addr, "HTTP API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;

    sweeper.stop().await;

    if let Err(e) = served {
        error!(error = %e, "HTTP server error");
        return Err(e.into());
    }

    info!("Hangar control shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }
}
