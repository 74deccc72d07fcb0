use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tastebud_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries = effective_values(&config)
        .into_iter()
        .map(|(key, value, env_key)| ConfigEntry {
            key,
            value,
            source: field_source(
                key,
                env_key,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect::<Vec<_>>();

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        serde_json::to_value(&entries).ok(),
    )
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let database = &config.database;
    let server = &config.server;
    let logging = &config.logging;
    let tuning = &config.recommendations;

    vec![
        ("database.url", database.url.clone(), "TASTEBUD_DATABASE_URL"),
        (
            "database.max_connections",
            database.max_connections.to_string(),
            "TASTEBUD_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", database.timeout_secs.to_string(), "TASTEBUD_DATABASE_TIMEOUT_SECS"),
        ("server.bind_address", server.bind_address.clone(), "TASTEBUD_SERVER_BIND_ADDRESS"),
        ("server.port", server.port.to_string(), "TASTEBUD_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            server.graceful_shutdown_secs.to_string(),
            "TASTEBUD_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", logging.level.clone(), "TASTEBUD_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", logging.format), "TASTEBUD_LOGGING_FORMAT"),
        (
            "recommendations.retention_days",
            tuning.retention_days.to_string(),
            "TASTEBUD_RECOMMENDATIONS_RETENTION_DAYS",
        ),
        (
            "recommendations.content_based_limit",
            tuning.content_based_limit.to_string(),
            "TASTEBUD_RECOMMENDATIONS_CONTENT_BASED_LIMIT",
        ),
        (
            "recommendations.collaborative_limit",
            tuning.collaborative_limit.to_string(),
            "TASTEBUD_RECOMMENDATIONS_COLLABORATIVE_LIMIT",
        ),
        (
            "recommendations.similar_user_min_matches",
            tuning.similar_user_min_matches.to_string(),
            "TASTEBUD_RECOMMENDATIONS_SIMILAR_USER_MIN_MATCHES",
        ),
        (
            "recommendations.repurchase_after_days",
            tuning.repurchase_after_days.to_string(),
            "TASTEBUD_RECOMMENDATIONS_REPURCHASE_AFTER_DAYS",
        ),
        (
            "recommendations.cold_start_size",
            tuning.cold_start_size.to_string(),
            "TASTEBUD_RECOMMENDATIONS_COLD_START_SIZE",
        ),
        (
            "recommendations.default_limit",
            tuning.default_limit.to_string(),
            "TASTEBUD_RECOMMENDATIONS_DEFAULT_LIMIT",
        ),
        (
            "recommendations.utc_offset_minutes",
            tuning.utc_offset_minutes.to_string(),
            "TASTEBUD_RECOMMENDATIONS_UTC_OFFSET_MINUTES",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("tastebud.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/tastebud.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }
    if let Some(alias) = legacy_alias(env_key) {
        if env::var_os(alias).is_some() {
            return format!("env ({alias})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn legacy_alias(env_key: &str) -> Option<&'static str> {
    match env_key {
        "TASTEBUD_LOGGING_LEVEL" => Some("TASTEBUD_LOG_LEVEL"),
        "TASTEBUD_LOGGING_FORMAT" => Some("TASTEBUD_LOG_FORMAT"),
        _ => None,
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
