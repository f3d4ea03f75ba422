use crate::commands::{
    load_config, runtime, CommandResult, EXIT_DATABASE, EXIT_MIGRATION, EXIT_VERIFICATION,
};
use enquote_db::{connect_with_config, migrations, DemoSeedDataset, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_VERIFICATION))?;

        let run_result: Result<SeedResult, (&'static str, String, u8)> =
            if verification.all_present {
                Ok(seeded)
            } else {
                Err((
                    "seed_verification",
                    verification_failure_message(&verification.checks),
                    EXIT_VERIFICATION,
                ))
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    let enquiries: Vec<String> =
        seeded.enquiries_seeded.iter().map(|id| format!("  - enquiry {id}")).collect();
    format!(
        "demo dataset loaded: {} customers, {} approval rules, {} enquiries:\n{}",
        seeded.customers_seeded,
        seeded.rules_seeded,
        seeded.enquiries_seeded.len(),
        enquiries.join("\n")
    )
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_failure_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [("CUST-RETAIL-001", true), ("ENQ-DEMO-002", false), ("AR-MANAGER-5K", false)];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for checks: ENQ-DEMO-002, AR-MANAGER-5K"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("CUST-RETAIL-001", true), ("AR-MANAGER-5K", true)];

        assert_eq!(verification_failure_message(&checks), "Some seed data failed to load");
    }
}
