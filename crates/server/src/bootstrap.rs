use std::sync::Arc;

use enquote_core::config::{AppConfig, ConfigError, LoadOptions};
use enquote_core::lifecycle::{LifecycleSettings, LoggingAcceptanceHook, QuotationService};
use enquote_db::{connect_with_config, migrations, DbPool, SqlQuotationStore};
use thiserror::Error;
use tracing::info;

pub type Service = QuotationService<SqlQuotationStore>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Service,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        database_url = %config.database.url,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlQuotationStore::new(db_pool.clone()));
    let service = QuotationService::new(store, LifecycleSettings::from_config(&config))
        .with_acceptance_hook(Arc::new(LoggingAcceptanceHook));

    Ok(Application { config, db_pool, service })
}
