use chrono::Utc;
use serde_json::json;
use tastebud_db::CampusDemoDataset;

use crate::commands::{
    engine_for, finish, open_database, prepare, CommandResult, StepError, EXIT_MIGRATION,
};

struct SeedOutput {
    products_seeded: usize,
    unavailable: usize,
    orders_replayed: usize,
    recommendations_generated: usize,
}

/// Loads the campus catalog and, on a database without demo history, replays its orders.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let catalog = CampusDemoDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

        let verification = CampusDemoDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_MIGRATION))?;
        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            pool.close().await;
            return Err::<SeedOutput, StepError>((
                "seed_verification",
                verification_message(&failed),
                EXIT_MIGRATION,
            ));
        }

        let already_replayed = CampusDemoDataset::has_history(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;
        let replay = if already_replayed {
            Default::default()
        } else {
            let engine = engine_for(&pool, &config);
            CampusDemoDataset::replay(&engine, Utc::now())
                .await
                .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?
        };

        pool.close().await;
        Ok(SeedOutput {
            products_seeded: catalog.products_seeded,
            unavailable: catalog.unavailable,
            orders_replayed: replay.orders_replayed,
            recommendations_generated: replay.recommendations_generated,
        })
    });

    finish("seed", result, |output| {
        let message = format!(
            "campus demo dataset loaded: {} products ({} unavailable), {} orders replayed",
            output.products_seeded, output.unavailable, output.orders_replayed
        );
        CommandResult::success_with_data(
            "seed",
            message,
            Some(json!({
                "products_seeded": output.products_seeded,
                "unavailable": output.unavailable,
                "orders_replayed": output.orders_replayed,
                "recommendations_generated": output.recommendations_generated,
            })),
        )
    })
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
