use serde::Serialize;
use serde_json::json;
use tastebud_core::domain::user::UserId;
use tastebud_core::recommendations::FeedSource;

use crate::commands::{engine_for, finish, open_database, prepare, CommandResult, StepError};

#[derive(Debug, Serialize)]
struct FeedLine {
    id: String,
    product_id: String,
    product_name: String,
    store_name: String,
    predicted_score: String,
    recommendation_type: &'static str,
    description: &'static str,
}

/// Prints the user's feed, running cold start when nothing is stored yet.
pub fn run(user: &str, limit: Option<usize>) -> CommandResult {
    let (config, runtime) = match prepare("recommend") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let user_id = UserId(user.to_owned());
    let limit = limit.unwrap_or(config.recommendations.default_limit);

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let feed = engine_for(&pool, &config).get_recommendations(&user_id, limit).await;
        pool.close().await;
        Ok::<_, StepError>(feed)
    });

    finish("recommend", result, |feed| {
        let source = match feed.source {
            FeedSource::Stored => "stored",
            FeedSource::ColdStart => "cold_start",
            FeedSource::Unavailable => "unavailable",
        };
        let lines = feed
            .items
            .iter()
            .map(|item| FeedLine {
                id: item.id.0.clone(),
                product_id: item.product_id.0.clone(),
                product_name: item.product_name.clone(),
                store_name: item.store_name.clone(),
                predicted_score: item.predicted_score.to_string(),
                recommendation_type: item.recommendation_type.as_str(),
                description: item.recommendation_type.description(),
            })
            .collect::<Vec<_>>();

        CommandResult::success_with_data(
            "recommend",
            format!("{} recommendations for {user_id} ({source})", lines.len()),
            Some(json!({ "user_id": user_id.0, "source": source, "items": lines })),
        )
    })
}
