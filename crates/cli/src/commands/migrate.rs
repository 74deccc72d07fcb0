use tastebud_db::migrations;

use crate::commands::{
    finish, open_database, prepare, CommandResult, StepError, EXIT_MIGRATION,
};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok::<_, StepError>(applied)
    });

    finish("migrate", result, |applied| {
        let versions = applied.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
        CommandResult::success("migrate", format!("applied pending migrations (schema at [{versions}])"))
    })
}
