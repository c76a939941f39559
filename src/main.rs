use std::sync::Arc;

use order_relay::api::{api_routes, ApiState};
use order_relay::catalog::CatalogHandle;
use order_relay::config::AppConfig;
use order_relay::dispatch::SmtpDispatcher;
use order_relay::poller::{run_once, spawn_order_poller, OrderSource, SpoolSource};
use order_relay::processor::OrderProcessor;
use order_relay::render::FallbackRenderer;
use order_relay::store::{LibSqlStore, OrderStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ORDER_RELAY_CATALOG=path/to/prices.csv");
        eprintln!("  export ORDER_RELAY_SMTP_HOST=smtp.example.com");
        eprintln!("  export ORDER_RELAY_TILEWARE_RECIPIENT=orders@tileware.example");
        eprintln!("  export ORDER_RELAY_LATICRETE_RECIPIENT=orders@laticrete.example");
        std::process::exit(1);
    });

    let once = std::env::args().any(|a| a == "--once");

    eprintln!("📦 Order Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Catalog: {}", config.catalog_path.display());
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Spool: {}", config.spool_dir.display());
    eprintln!("   API: http://0.0.0.0:{}/api/orders", config.api_port);

    // ── Store and catalog ────────────────────────────────────────────
    let store: Arc<dyn OrderStore> = Arc::new(LibSqlStore::open(&config.db_path).await?);
    let catalog = Arc::new(CatalogHandle::load(&config.catalog_path)?);
    tracing::info!(entries = catalog.snapshot().len(), "Catalog ready");

    if let Some(keep_days) = config.keep_days {
        store.prune(keep_days).await?;
    }

    // ── Processing pipeline ──────────────────────────────────────────
    let dispatcher = Arc::new(SmtpDispatcher::new(&config.smtp)?);
    let processor = Arc::new(OrderProcessor::new(
        Arc::clone(&store),
        Arc::clone(&catalog),
        Arc::new(FallbackRenderer::standard()),
        dispatcher,
        config.recipients.clone(),
        config.dispatch_attempts,
    ));

    let source: Arc<dyn OrderSource> = Arc::new(SpoolSource::new(&config.spool_dir));

    if once {
        // Single-shot mode: drain the spool and exit.
        run_once(&source, &processor).await;
        return Ok(());
    }

    let (poller_handle, poller_shutdown) =
        spawn_order_poller(source, Arc::clone(&processor), config.poll_interval_secs);

    // ── Admin API ────────────────────────────────────────────────────
    let app = api_routes(ApiState {
        store,
        processor,
        catalog,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api_port)).await?;
    tracing::info!(port = config.api_port, "Admin API started");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    poller_shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    poller_handle.abort();
    Ok(())
}
