use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use enquote_core::audit::verify_trail;
use enquote_core::config::{AppConfig, LoadOptions};
use enquote_core::domain::approval::ApprovalDecision;
use enquote_core::domain::enquiry::EnquiryId;
use enquote_core::domain::quotation::QuotationStatus;
use enquote_core::errors::EntityKind;
use enquote_core::lifecycle::{ApprovalDecisionInput, LifecycleSettings, QuotationService};
use enquote_core::store::{AuditRecorder, InMemoryQuotationStore};
use enquote_db::{connect_with_config, migrations, DemoSeedDataset};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::{runtime, CommandResult, EXIT_VERIFICATION};

/// Demo enquiry whose total needs manager sign-off before it can be sent.
const WALKTHROUGH_ENQUIRY: &str = "ENQ-DEMO-003";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("lifecycle_walkthrough"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match runtime("smoke") {
        Ok(runtime) => runtime,
        Err(_) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: "failed to initialize async runtime".to_string(),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("lifecycle_walkthrough"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async { connect_with_config(&config.database).await });

    match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(db_started),
                message: format!("connected using `{}`", config.database.url),
            });

            let migration_started = Instant::now();
            let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
            runtime.block_on(async {
                pool.close().await;
            });

            checks.push(match migration_result {
                Ok(()) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Pass,
                    elapsed_ms: elapsed_since(migration_started),
                    message: "migrations are visible and executable".to_string(),
                },
                Err(error) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Fail,
                    elapsed_ms: elapsed_since(migration_started),
                    message: format!("migration execution failed: {error}"),
                },
            });
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
        }
    }

    let walkthrough_started = Instant::now();
    checks.push(match lifecycle_walkthrough(&runtime, &config) {
        Ok(message) => SmokeCheck {
            name: "lifecycle_walkthrough",
            status: SmokeStatus::Pass,
            elapsed_ms: elapsed_since(walkthrough_started),
            message,
        },
        Err(message) => SmokeCheck {
            name: "lifecycle_walkthrough",
            status: SmokeStatus::Fail,
            elapsed_ms: elapsed_since(walkthrough_started),
            message,
        },
    });

    finalize_report(checks, elapsed_since(started))
}

/// Generate, revise, approve and send the demo boardroom enquiry against an in-memory
/// store, then verify both audit chains.
fn lifecycle_walkthrough(runtime: &Runtime, config: &AppConfig) -> Result<String, String> {
    let store = Arc::new(InMemoryQuotationStore::new());
    for customer in DemoSeedDataset::customers() {
        store.insert_customer(customer);
    }
    for enquiry in DemoSeedDataset::enquiries(Utc::now()) {
        store.insert_enquiry(enquiry);
    }
    for rule in DemoSeedDataset::rules() {
        store.insert_rule(rule);
    }
    let service = QuotationService::new(Arc::clone(&store), LifecycleSettings::from_config(config));

    runtime.block_on(async {
        let original = service
            .generate_from_enquiry(&EnquiryId(WALKTHROUGH_ENQUIRY.to_string()), "smoke")
            .await
            .map_err(|error| format!("generate: {error}"))?;
        let revision = service
            .create_revision(&original.id, "smoke revision", "smoke")
            .await
            .map_err(|error| format!("revise: {error}"))?;

        let level = revision
            .required_approval_level
            .clone()
            .ok_or_else(|| format!("{} should require approval", revision.quote_number))?;
        service
            .record_approval_decision(
                &revision.id,
                ApprovalDecisionInput {
                    approver_level: level.clone(),
                    approver_id: "smoke-approver".to_string(),
                    decision: ApprovalDecision::Approved,
                    comments: None,
                },
            )
            .await
            .map_err(|error| format!("approve: {error}"))?;
        let sent = service
            .transition_status(&revision.id, QuotationStatus::Sent, "smoke")
            .await
            .map_err(|error| format!("send: {error}"))?;
        if sent.status != QuotationStatus::Sent {
            return Err(format!("{} ended in {} instead of sent", sent.quote_number, sent.status));
        }

        for id in [&original.id, &revision.id] {
            let trail = store
                .list_entries(EntityKind::Quotation, &id.0)
                .await
                .map_err(|error| format!("audit trail: {error}"))?;
            let verification = verify_trail(&trail);
            if !verification.valid {
                return Err(format!("audit trail for {id} failed verification"));
            }
        }

        Ok(format!(
            "{} revised to {}, approved at {level} level, sent for {}",
            original.quote_number, sent.quote_number, sent.total_amount
        ))
    })
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult {
        exit_code: if failed { EXIT_VERIFICATION } else { 0 },
        output: format!("{human}\n{machine}"),
    }
}
