use enquote_core::config::{AppConfig, LoadOptions};
use enquote_db::{connect_with_config, migrations, DbPool, SqlQuotationStore};
use serde::Serialize;

use crate::commands::{runtime, CommandResult, EXIT_VERIFICATION};

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

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "migration_status", "approval_rules"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_VERIFICATION };

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
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DATABASE_CHECKS.into_iter().map(|name| {
                skipped(name, "skipped because configuration did not load")
            }));
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

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: "failed to initialize async runtime".to_string(),
            }];
            checks.extend(
                DATABASE_CHECKS[1..].iter().map(|name| skipped(*name, "skipped without a runtime")),
            );
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
                checks.extend(
                    DATABASE_CHECKS[1..]
                        .iter()
                        .map(|name| skipped(*name, "skipped because the database is unreachable")),
                );
                return checks;
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        let migration_check = check_migrations(&pool).await;
        let schema_ready = migration_check.status == CheckStatus::Pass;
        checks.push(migration_check);
        checks.push(if schema_ready {
            check_approval_rules(&pool).await
        } else {
            skipped("approval_rules", "skipped until migrations are applied")
        });

        pool.close().await;
        checks
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => DoctorCheck {
            name: "migration_status",
            status: CheckStatus::Pass,
            details: "schema is up to date".to_string(),
        },
        Ok(pending) => DoctorCheck {
            name: "migration_status",
            status: CheckStatus::Fail,
            details: format!("pending migrations {pending:?}; run `enquote migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "migration_status",
            status: CheckStatus::Fail,
            details: format!("could not read migration state: {error}"),
        },
    }
}

async fn check_approval_rules(pool: &DbPool) -> DoctorCheck {
    let store = SqlQuotationStore::new(pool.clone());
    match store.list_approval_rules().await {
        Ok(rules) => {
            let active = rules.iter().filter(|rule| rule.is_active).count();
            let details = if active == 0 {
                "no active approval rules; every quotation will be auto-approved".to_string()
            } else {
                format!("{active} active of {} configured approval rules", rules.len())
            };
            DoctorCheck { name: "approval_rules", status: CheckStatus::Pass, details }
        }
        Err(error) => DoctorCheck {
            name: "approval_rules",
            status: CheckStatus::Fail,
            details: format!("could not read approval rules: {error}"),
        },
    }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
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
