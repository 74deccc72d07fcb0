use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub recommendations: RecommendationsConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Tunables for regeneration, cold start and the read path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecommendationsConfig {
    pub retention_days: u32,
    pub content_based_limit: usize,
    pub collaborative_limit: usize,
    pub similar_user_min_matches: u32,
    pub repurchase_after_days: u32,
    pub cold_start_size: usize,
    pub default_limit: usize,
    /// Offset of the marketplace's wall clock from UTC, used for hour-of-day habits.
    pub utc_offset_minutes: i32,
}

impl Default for RecommendationsConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            content_based_limit: 10,
            collaborative_limit: 5,
            similar_user_min_matches: 2,
            repurchase_after_days: 3,
            cold_start_size: 8,
            default_limit: 10,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tastebud.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            recommendations: RecommendationsConfig::default(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tastebud.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(recommendations) = patch.recommendations {
            let target = &mut self.recommendations;
            if let Some(value) = recommendations.retention_days {
                target.retention_days = value;
            }
            if let Some(value) = recommendations.content_based_limit {
                target.content_based_limit = value;
            }
            if let Some(value) = recommendations.collaborative_limit {
                target.collaborative_limit = value;
            }
            if let Some(value) = recommendations.similar_user_min_matches {
                target.similar_user_min_matches = value;
            }
            if let Some(value) = recommendations.repurchase_after_days {
                target.repurchase_after_days = value;
            }
            if let Some(value) = recommendations.cold_start_size {
                target.cold_start_size = value;
            }
            if let Some(value) = recommendations.default_limit {
                target.default_limit = value;
            }
            if let Some(value) = recommendations.utc_offset_minutes {
                target.utc_offset_minutes = value;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TASTEBUD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TASTEBUD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TASTEBUD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TASTEBUD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASTEBUD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TASTEBUD_SERVER_PORT") {
            self.server.port = parse_u16("TASTEBUD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TASTEBUD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TASTEBUD_LOGGING_LEVEL").or_else(|| read_env("TASTEBUD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TASTEBUD_LOGGING_FORMAT").or_else(|| read_env("TASTEBUD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        let target = &mut self.recommendations;
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_RETENTION_DAYS") {
            target.retention_days = parse_u32("TASTEBUD_RECOMMENDATIONS_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_CONTENT_BASED_LIMIT") {
            target.content_based_limit =
                parse_usize("TASTEBUD_RECOMMENDATIONS_CONTENT_BASED_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_COLLABORATIVE_LIMIT") {
            target.collaborative_limit =
                parse_usize("TASTEBUD_RECOMMENDATIONS_COLLABORATIVE_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_SIMILAR_USER_MIN_MATCHES") {
            target.similar_user_min_matches =
                parse_u32("TASTEBUD_RECOMMENDATIONS_SIMILAR_USER_MIN_MATCHES", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_REPURCHASE_AFTER_DAYS") {
            target.repurchase_after_days =
                parse_u32("TASTEBUD_RECOMMENDATIONS_REPURCHASE_AFTER_DAYS", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_COLD_START_SIZE") {
            target.cold_start_size =
                parse_usize("TASTEBUD_RECOMMENDATIONS_COLD_START_SIZE", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_DEFAULT_LIMIT") {
            target.default_limit = parse_usize("TASTEBUD_RECOMMENDATIONS_DEFAULT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("TASTEBUD_RECOMMENDATIONS_UTC_OFFSET_MINUTES") {
            target.utc_offset_minutes =
                parse_i32("TASTEBUD_RECOMMENDATIONS_UTC_OFFSET_MINUTES", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(offset) = overrides.utc_offset_minutes {
            self.recommendations.utc_offset_minutes = offset;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_recommendations(&self.recommendations)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tastebud.toml"), PathBuf::from("config/tastebud.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_recommendations(settings: &RecommendationsConfig) -> Result<(), ConfigError> {
    if settings.retention_days == 0 {
        return Err(ConfigError::Validation(
            "recommendations.retention_days must be greater than zero".to_string(),
        ));
    }

    let limits = [
        ("recommendations.content_based_limit", settings.content_based_limit),
        ("recommendations.collaborative_limit", settings.collaborative_limit),
        ("recommendations.cold_start_size", settings.cold_start_size),
        ("recommendations.default_limit", settings.default_limit),
    ];
    if let Some((key, _)) = limits.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Validation(format!("{key} must be greater than zero")));
    }

    if settings.similar_user_min_matches == 0 {
        return Err(ConfigError::Validation(
            "recommendations.similar_user_min_matches must be greater than zero".to_string(),
        ));
    }

    if !(-720..=840).contains(&settings.utc_offset_minutes) {
        return Err(ConfigError::Validation(
            "recommendations.utc_offset_minutes must be in range -720..=840".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.trim().parse::<i32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    recommendations: Option<RecommendationsPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationsPatch {
    retention_days: Option<u32>,
    content_based_limit: Option<usize>,
    collaborative_limit: Option<usize>,
    similar_user_min_matches: Option<u32>,
    repurchase_after_days: Option<u32>,
    cold_start_size: Option<usize>,
    default_limit: Option<usize>,
    utc_offset_minutes: Option<i32>,
}
