//! AI service - defect-prediction model lifecycle
//!
//! Serves predictions for repository jobs, building a model with the
//! external worker when none is usable and reusing it otherwise.

use ai_lib::{
    api::{self, AppState},
    auth::{AuthCheck, JwtTokenSource, LocalKeySource},
    health::{components, HealthRegistry},
    model::{ModelRepository, SqliteModelStore},
    observability::{ServiceMetrics, StructuredLogger},
    orchestrator::PredictionService,
    worker::ProcessWorker,
};
use anyhow::{Context, Result};
use axum::{body::Body, http::Request, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::ServiceConfig;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ai-server");

    let config = ServiceConfig::load()?;
    info!(
        service_name = %config.service_name,
        models_root = %config.models_root.display(),
        database = %config.database_path.display(),
        "Service configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL_STORE).await;
    health_registry.register(components::WORKER).await;

    let store = SqliteModelStore::open(&config.database_path).with_context(|| {
        format!("failed to open model database {}", config.database_path.display())
    })?;
    let models: Arc<dyn ModelRepository> = Arc::new(store);
    if let Err(e) = models.ping().await {
        error!(error = %e, "Model store ping failed");
        health_registry
            .set_unhealthy(components::MODEL_STORE, e.to_string())
            .await;
    }

    if tokio::fs::metadata(&config.worker_executable).await.is_err() {
        warn!(executable = %config.worker_executable.display(), "Worker executable not found");
        health_registry
            .set_degraded(
                components::WORKER,
                format!("executable {} not found", config.worker_executable.display()),
            )
            .await;
    }

    let tokens = load_token_source(&config)?;
    info!(issuer = %tokens.issuer(), "Worker credentials loaded");
    let worker = ProcessWorker::new(config.worker_config(), Arc::new(tokens));

    let metrics = ServiceMetrics::new();
    let logger = StructuredLogger::new(&config.service_name);

    let predictions = PredictionService::new(models, Arc::new(worker), &config.models_root)
        .with_logger(logger.clone());

    let keys = load_key_source(&config)?;
    if keys.is_empty() {
        warn!("No public keys configured, every authenticated request will be rejected");
    }
    info!(issuers = keys.len(), "Token verification keys loaded");
    let auth = AuthCheck::new(Arc::new(keys));
    let state = Arc::new(AppState::new(
        Arc::new(predictions),
        auth,
        health_registry.clone(),
        metrics,
    ));

    let app = with_http_layers(api::create_router(state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    logger.log_startup(SERVICE_VERSION, config.listen_port);
    health_registry.set_ready(true).await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(health_registry.clone()))
        .await
        .context("server error")?;

    logger.log_shutdown("signal received");
    info!("Shutting down");

    Ok(())
}

fn load_token_source(config: &ServiceConfig) -> Result<JwtTokenSource> {
    let path = config
        .private_key_path
        .as_ref()
        .context("private_key_path is not configured")?;
    let pem = std::fs::read(path)
        .with_context(|| format!("failed to read private key {}", path.display()))?;

    JwtTokenSource::from_ec_pem(&config.service_name, &pem, config.token_ttl())
        .with_context(|| format!("invalid private key {}", path.display()))
}

fn load_key_source(config: &ServiceConfig) -> Result<LocalKeySource> {
    let mut keys = LocalKeySource::new();
    for (issuer, path) in &config.public_keys {
        let pem = std::fs::read(path)
            .with_context(|| format!("failed to read public key {}", path.display()))?;
        keys = keys
            .add_ec_pem(issuer.as_str(), &pem)
            .with_context(|| format!("invalid public key for issuer {issuer}"))?;
        info!(issuer = %issuer, "Trusting issuer");
    }
    Ok(keys)
}

/// Request ids, request tracing and id propagation on responses
fn with_http_layers(router: Router) -> Router {
    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn shutdown_signal(health_registry: HealthRegistry) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }

    health_registry.set_ready(false).await;
}
