use serde::Serialize;
use tastebud_core::config::{AppConfig, LoadOptions};
use tastebud_db::{connect_with_settings, migrations, ping, DbPool};

use crate::commands::{CommandResult, EXIT_DOCTOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let connected = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await;
        let pool = match connected {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "schema_migrations",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let connectivity = match ping(&pool).await {
            Ok(()) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            Err(error) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("database query failed: {error}"),
            },
        };
        let schema = check_schema(&pool).await;
        pool.close().await;

        vec![connectivity, schema]
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = migrations::known_versions();
    match migrations::applied_versions(pool).await {
        Ok(applied) => {
            let pending =
                known.iter().filter(|version| !applied.contains(version)).collect::<Vec<_>>();
            if pending.is_empty() {
                DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Pass,
                    details: format!("{} migrations applied", applied.len()),
                }
            } else {
                DoctorCheck {
                    name: "schema_migrations",
                    status: CheckStatus::Fail,
                    details: format!(
                        "{} pending migrations; run `tastebud migrate`",
                        pending.len()
                    ),
                }
            }
        }
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("could not read migration history: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
