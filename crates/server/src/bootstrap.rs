use std::sync::Arc;

use tastebud_core::config::{AppConfig, ConfigError};
use tastebud_core::recommendations::RecommendationEngine;
use tastebud_db::{
    connect_with_settings, migrations, DbPool, SqlBehaviorProfileRepository,
    SqlProductRepository, SqlRecommendationRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<RecommendationEngine>,
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

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = RecommendationEngine::new(
        Arc::new(SqlBehaviorProfileRepository::new(db_pool.clone())),
        Arc::new(SqlRecommendationRepository::new(db_pool.clone())),
        Arc::new(SqlProductRepository::new(db_pool.clone())),
        config.recommendations.clone(),
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}
