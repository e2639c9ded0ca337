mod error;
mod executor;
mod handle;
mod handlers;
mod routes;
mod session;
mod session_tests;
mod utf8;
mod workspace;
mod ws;

use anyhow::Context;
use axum::Router;
use executor::{ExecContext, ExecutorSet};
use handle::HandleOptions;
use notjs_common::{Settings, ToolchainRegistry};
use session::SessionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use workspace::ScratchDir;

pub struct AppState {
    pub registry: Arc<ToolchainRegistry>,
    pub sessions: SessionManager,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("NotJS server booting...");

    let settings = Settings::from_env().map_err(|e| {
        error!("Invalid settings: {:#}", e);
        e
    })?;

    let registry = ToolchainRegistry::load_or_builtin(&settings.toolchains_path).map_err(|e| {
        error!("Failed to load toolchains: {:#}", e);
        error!("Check {} or remove it to use the built-in table", settings.toolchains_path.display());
        e
    })?;
    info!("Loaded toolchains for: {:?}", registry.list_languages());

    let scratch = ScratchDir::ensure(&settings.scratch_dir)
        .with_context(|| format!("Failed to create scratch directory {}", settings.scratch_dir.display()))?;
    info!("Scratch directory: {}", scratch.root().display());

    let ctx = ExecContext {
        scratch,
        handle: HandleOptions {
            grace: settings.teardown_grace,
            output_chunk_bytes: settings.output_chunk_bytes,
            ..Default::default()
        },
    };
    let executors = ExecutorSet::from_registry(&registry, ctx).map_err(|e| {
        error!("{}", e);
        e
    })?;

    let registry = Arc::new(registry);
    let sessions = SessionManager::new(registry.clone(), Arc::new(executors), settings.max_source_bytes);
    let state = Arc::new(AppState {
        registry,
        sessions: sessions.clone(),
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;

    info!("HTTP server listening on {}", settings.bind_addr);
    info!("Ready to accept sessions on /ws/terminal");

    // Upgraded sockets outlive graceful shutdown, so sessions are closed here
    let shutdown = async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, closing {} sessions...", sessions.active_sessions());
        sessions.shutdown_all().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("NotJS server stopped");
    Ok(())
}
