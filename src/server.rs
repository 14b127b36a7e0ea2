/// Server setup and initialization
///
/// Wires together storage, registry, execution engine, timer manager and
/// the HTTP routes, and provides the application factory used by both the
/// binary and the tests.

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::{
    api::{
        dispatcher::create_dispatcher_routes, execution::create_execution_routes,
        timers::create_timer_routes, webhooks::create_webhook_routes,
        workflows::create_workflow_routes, AppState,
    },
    config::Config,
    llm::GigaChatClient,
    runtime::{TimerManager, WorkflowEngine},
    workflow::{WorkflowRegistry, WorkflowStorage},
};

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::open(&config.database.data_dir).await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    tracing::info!("🤖 Initializing GigaChat client");
    let chat = Arc::new(GigaChatClient::new(config.gigachat.clone())?);

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(WorkflowEngine::new(storage.clone(), chat));

    tracing::info!("⏰ Initializing timer manager");
    let timers = Arc::new(TimerManager::new(storage.clone(), Arc::clone(&engine)).await?);
    timers.start().await?;

    let state = AppState {
        storage,
        registry,
        engine,
        timers,
        public_base_url: config.server.public_base_url.clone(),
    };

    tracing::info!("📡 Creating HTTP router");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .merge(create_timer_routes())
        .merge(create_webhook_routes())
        .merge(create_dispatcher_routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting aiflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
