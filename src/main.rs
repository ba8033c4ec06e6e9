//! Loan ledger server
//!
//! Serves the loan lifecycle API over HTTP, backed by PostgreSQL, and runs
//! the agreement letter dispatcher in the background.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use loan_ledger_server::config::Config;
use loan_ledger_server::db;
use loan_ledger_server::id::SnowflakeGenerator;
use loan_ledger_server::loan::{
    AgreementDispatcher, AgreementLocator, FundedLoanQueue, LoanEventBus, LoanService, LoanStore,
    PgLoanStore, RetryPolicy, TracingNotifier,
};
use loan_ledger_server::routes;
use loan_ledger_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        node_id = config.node_id,
        "Starting loan ledger server"
    );

    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let store: Arc<dyn LoanStore> = Arc::new(PgLoanStore::new(db_pool));
    let ids = Arc::new(SnowflakeGenerator::new(config.node_id)?);
    let events = LoanEventBus::new(config.event_bus_capacity);
    let (funded_queue, funded_loans) = FundedLoanQueue::new();
    let shutdown = CancellationToken::new();

    let loan_service = Arc::new(
        LoanService::new(
            store.clone(),
            ids,
            events,
            AgreementLocator::new(config.agreement_dir.clone()),
        )
        .with_operation_timeout(config.operation_timeout)
        .with_shutdown(shutdown.clone())
        .with_funded_queue(funded_queue),
    );

    let dispatcher = AgreementDispatcher::new(
        store,
        Arc::new(TracingNotifier),
        RetryPolicy {
            max_attempts: config.notify_max_attempts,
            ..RetryPolicy::default()
        },
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(funded_loans, shutdown.clone()));

    let app = routes::app(AppState::new(loan_service))
        .layer(ServiceBuilder::new().layer(configure_cors(&config)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = dispatcher_handle.await {
        tracing::error!(error = %e, "Agreement dispatcher task failed");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins = config.cors_allowed_origins.as_deref().unwrap_or_default();

    if allowed_origins.is_empty() {
        if config.environment.is_production() {
            tracing::warn!("CORS_ALLOWED_ORIGINS not set in production, cross-origin requests are refused");
            return CorsLayer::new();
        }
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Resolves on Ctrl+C or SIGTERM and cancels in-flight loan operations
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown.cancel();
}
