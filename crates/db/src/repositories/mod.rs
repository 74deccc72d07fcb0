use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use tastebud_core::errors::StoreError;

pub mod behavior;
pub mod memory;
pub mod product;
pub mod recommendation;

pub use behavior::SqlBehaviorProfileRepository;
pub use memory::{InMemoryBehaviorProfileStore, InMemoryProductCatalog, InMemoryRecommendationStore};
pub use product::SqlProductRepository;
pub use recommendation::SqlRecommendationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => StoreError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// Fixed-width UTC form so that stored timestamps compare correctly as text.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: {error}"))
        })
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in `{column}`: {error}")))
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative or oversized `{column}`: {value}")))
}

/// Numeric shadow of a decimal column, used only for `ORDER BY`.
pub(crate) fn sort_key(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
