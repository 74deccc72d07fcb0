pub mod config;
pub mod doctor;
pub mod migrate;
pub mod recommend;
pub mod regenerate;
pub mod seed;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tastebud_core::config::{AppConfig, LoadOptions};
use tastebud_core::recommendations::RecommendationEngine;
use tastebud_db::{
    connect_with_settings, migrations, DbPool, SqlBehaviorProfileRepository,
    SqlProductRepository, SqlRecommendationRepository,
};
use tokio::runtime::Runtime;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB_CONNECTIVITY: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_DOCTOR: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Failure inside a command body: `(error_class, message, exit_code)`.
pub(crate) type StepError = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Loads configuration and a current-thread runtime, the preamble of every database command.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        })?;

    Ok((config, runtime))
}

/// Connects and applies pending migrations.
pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, StepError> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

    Ok(pool)
}

pub(crate) fn engine_for(pool: &DbPool, config: &AppConfig) -> RecommendationEngine {
    RecommendationEngine::new(
        Arc::new(SqlBehaviorProfileRepository::new(pool.clone())),
        Arc::new(SqlRecommendationRepository::new(pool.clone())),
        Arc::new(SqlProductRepository::new(pool.clone())),
        config.recommendations.clone(),
    )
}

pub(crate) fn finish<T>(
    command: &str,
    result: Result<T, StepError>,
    render: impl FnOnce(T) -> CommandResult,
) -> CommandResult {
    match result {
        Ok(value) => render(value),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
