use tastebud_core::domain::user::UserId;

use crate::commands::{
    engine_for, finish, open_database, prepare, CommandResult, StepError, EXIT_RUNTIME,
};

pub fn run(user: &str) -> CommandResult {
    let (config, runtime) = match prepare("regenerate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let user_id = UserId(user.to_owned());

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let report = engine_for(&pool, &config)
            .regenerate(&user_id)
            .await
            .map_err(|error| ("regeneration", error.to_string(), EXIT_RUNTIME));
        pool.close().await;
        Ok::<_, StepError>(report?)
    });

    finish("regenerate", result, |report| {
        let message = format!(
            "regenerated recommendations for {}: purged {}, inserted {}",
            report.user_id, report.purged, report.inserted
        );
        CommandResult::success_with_data("regenerate", message, serde_json::to_value(&report).ok())
    })
}
