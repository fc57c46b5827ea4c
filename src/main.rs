use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_chain::api::{self, AppState};
use audit_chain::checkpoint::{CheckpointScheduler, CheckpointService};
use audit_chain::config::AppConfig;
use audit_chain::store::{AuditStore, SqlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_chain=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting audit chain service");

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    let store = SqlStore::connect(&config.database.url).await?;
    store.migrate().await?;
    store.initialize().await?;
    let store: Arc<dyn AuditStore> = Arc::new(store);
    info!("Audit store ready at sequence {}", store.get_sequence().await);

    let witness = config.build_witness()?;
    let co_signer = witness.multi_agency().cloned().map(Arc::new);
    info!("Using {} witness", witness.witness_type());

    let checkpoints = Arc::new(
        CheckpointService::new(store.clone(), witness).with_timeout(config.checkpoint_timeout()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = config.checkpoint_interval().map(|interval| {
        CheckpointScheduler::new(checkpoints.clone(), interval).spawn(shutdown_rx)
    });

    let mut state = AppState::new(store, checkpoints);
    if let Some(co_signer) = co_signer {
        state = state.with_co_signer(co_signer);
    }
    let app = api::router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        handle.await?;
    }

    Ok(())
}
