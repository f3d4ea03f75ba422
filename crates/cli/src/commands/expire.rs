use std::sync::Arc;

use chrono::{DateTime, Utc};
use enquote_core::lifecycle::{ExpirySweep, LifecycleSettings, QuotationService};
use enquote_db::{connect_with_config, migrations, SqlQuotationStore};

use crate::commands::{
    load_config, runtime, CommandResult, EXIT_DATABASE, EXIT_LIFECYCLE, EXIT_MIGRATION,
};

/// System expiry sweep. Quotations that lose a race with a concurrent writer are reported
/// as skipped and left for the next sweep.
pub fn run(as_of: Option<DateTime<Utc>>) -> CommandResult {
    let config = match load_config("expire") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("expire") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let as_of = as_of.unwrap_or_else(Utc::now);

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        let service = QuotationService::new(
            Arc::new(SqlQuotationStore::new(pool.clone())),
            LifecycleSettings::from_config(&config),
        );
        let sweep: Result<ExpirySweep, (&'static str, String, u8)> = service
            .expire_overdue(as_of)
            .await
            .map_err(|error| (error.error_class(), error.to_string(), EXIT_LIFECYCLE));

        pool.close().await;
        sweep
    });

    match result {
        Ok(sweep) => {
            let expired: Vec<&str> = sweep.expired.iter().map(|id| id.0.as_str()).collect();
            let skipped: Vec<&str> = sweep.skipped.iter().map(|id| id.0.as_str()).collect();
            CommandResult::success(
                "expire",
                format!(
                    "swept as of {}: expired {} [{}], skipped {} [{}]",
                    as_of.to_rfc3339(),
                    expired.len(),
                    expired.join(", "),
                    skipped.len(),
                    skipped.join(", ")
                ),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}
