mod chain;
mod config;
mod db;
mod decimal;
mod engine;
mod error;
mod evm_facade;
mod ledger;
mod metrics;
mod reconciler;
mod token_service;
mod types;
mod writers;

use std::time::Duration;

use chain::ChainClient;
use config::Config;
use engine::Engine;
use ledger::LedgerClient;
use reconciler::Reconciler;
use token_service::TokenService;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging);

    tracing::info!("starting wayfinder bridge relayer");

    let db = db::create_pool(&config.database.url, config.database.max_connections).await?;
    tracing::info!("database connected");

    db::run_migrations(&db).await?;
    tracing::info!("database migrations complete");

    let ledger = LedgerClient::connect(&config.canton).await?;
    tracing::info!(rpc_url = %config.canton.rpc_url, "ledger client connected");

    let chain = ChainClient::new(&config.ethereum)?;
    tracing::info!(chain_id = config.ethereum.chain_id, "chain client ready");

    let engine = Engine::bootstrap(
        db.clone(),
        chain.clone(),
        ledger.clone(),
        config.ethereum.chain_id,
        config.ethereum.lookback_blocks,
        config.ethereum.start_block,
        config.canton.relayer_party.clone(),
        config.canton.relayer_party.clone(),
    )
    .await?;

    let mut reconciler = Reconciler::new(
        db.clone(),
        ledger.clone(),
        Duration::from_secs(config.reconciliation.interval_secs),
    );

    let token_service = TokenService::new(db.clone(), ledger.clone());
    let app_state = evm_facade::AppState {
        db: db.clone(),
        token_service,
        eth_rpc: config.eth_rpc.clone(),
        token: config.token.clone(),
    };
    let router = evm_facade::router(app_state);
    let http_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "evm facade listening");

    let (engine_shutdown_tx, engine_shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (reconciler_shutdown_tx, reconciler_shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (http_shutdown_tx, mut http_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let engine_handle = tokio::spawn(engine.run(engine_shutdown_rx));
    let reconciler_handle = tokio::spawn(async move { reconciler.run(reconciler_shutdown_rx).await });
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = (&mut http_shutdown_rx).await;
            })
            .await
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping subsystems");

    let shutdown_timeout = Duration::from_secs(config.shutdown.timeout_secs);

    let _ = engine_shutdown_tx.send(()).await;
    if tokio::time::timeout(shutdown_timeout, engine_handle).await.is_err() {
        tracing::warn!("engine did not stop within shutdown timeout");
    }

    let _ = reconciler_shutdown_tx.send(()).await;
    if tokio::time::timeout(shutdown_timeout, reconciler_handle).await.is_err() {
        tracing::warn!("reconciler did not stop within shutdown timeout");
    }

    let _ = http_shutdown_tx.send(());
    if tokio::time::timeout(shutdown_timeout, http_handle).await.is_err() {
        tracing::warn!("http server did not stop within shutdown timeout");
    }

    db.close().await;
    drop(ledger);

    tracing::info!("wayfinder bridge relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output, honoring
/// `logging.filter` and switching to JSON lines when `logging.json` is set.
fn init_logging(logging: &config::LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.filter.clone()));

    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }
}
