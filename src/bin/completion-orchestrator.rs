//! # Completion Orchestrator
//!
//! Standalone process running the dispatcher worker pool against the
//! configured store and completion provider until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use completion_core::config::{ConfigManager, StorageBackend};
use completion_core::database::{DatabaseConnection, InMemoryStore, PgStore, TransactionalStore};
use completion_core::logging::init_structured_logging;
use completion_core::messaging::{DispatchQueue, InMemoryDispatchQueue, PgDispatchQueue};
use completion_core::orchestration::OrchestrationSystem;
use completion_core::provider::{HttpCompletionProvider, HttpProviderConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::load().context("failed to load configuration")?;
    let config = manager.config();

    init_structured_logging(&config.logging);
    info!(
        environment = manager.environment(),
        config = %manager.debug_config(),
        "⚙️ CONFIG: Loaded configuration"
    );

    let (store, queue): (Arc<dyn TransactionalStore>, Arc<dyn DispatchQueue>) =
        match config.database.backend {
            StorageBackend::Memory => {
                warn!("🗄️ STORE: Using in-memory storage, state is lost on exit");
                (
                    Arc::new(InMemoryStore::new()),
                    Arc::new(InMemoryDispatchQueue::new()),
                )
            }
            StorageBackend::Postgres => {
                let connection = DatabaseConnection::connect(&config.database)
                    .await
                    .context("failed to connect to database")?;
                let store = PgStore::new(connection.pool().clone());
                if config.database.run_migrations {
                    store.migrate().await.context("failed to run migrations")?;
                }
                let queue = PgDispatchQueue::new(connection.pool().clone());
                (Arc::new(store), Arc::new(queue))
            }
        };

    let provider = HttpCompletionProvider::new(HttpProviderConfig {
        base_url: config.provider.base_url.clone(),
        api_key: config.provider.api_key.clone(),
        request_timeout: config.provider.request_timeout(),
        list_messages_limit: config.provider.list_messages_limit,
    })
    .context("failed to build completion provider client")?;

    let system = OrchestrationSystem::new(config, store, queue, Arc::new(provider));
    system.start().await.context("failed to start dispatcher")?;
    info!("✅ ORCHESTRATOR: Ready, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("🛑 ORCHESTRATOR: Shutdown requested");

    system.shutdown().await.context("unclean shutdown")?;
    Ok(())
}
