//! Recommendation pipeline
//!
//! Turns per-(user, product) behavior profiles into a ranked, persisted set of
//! recommendations. Four independent strategies propose candidates, the engine
//! merges and deduplicates them, and a cold-start path covers users without history.

mod engine;
pub mod ports;
mod reorder;
mod similarity;
mod strategies;
mod types;

pub use engine::{cold_start_picks, effectiveness_by_type, summarize_insights, RecommendationEngine};
pub use ports::{BehaviorProfileStore, ProductCatalog, RecommendationStore};
pub use reorder::partition_by_affinity;
pub use similarity::SimilarityIndex;
pub use strategies::{
    default_strategies, due_for_repurchase, score_collaborative, score_content_based,
    score_repurchase, score_temporal, CategoryGroup, CollaborativeStrategy, ContentBasedStrategy,
    Exclusions, Neighbor, RepurchaseStrategy, ScoringStrategy, StrategyContext, TemporalStrategy,
};
pub use types::*;

use rust_decimal::Decimal;

use crate::errors::ApplicationError;

/// Result type for engine operations
pub type RecommendationResult<T> = Result<T, ApplicationError>;

/// Flat bonus added to the user's average category affinity
pub const CONTENT_BASED_BONUS: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Category affinity assumed when the user has no profile in the category
pub const NEUTRAL_CATEGORY_AFFINITY: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Share of a neighbor's affinity carried over to the target user
pub const COLLABORATIVE_FACTOR: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Bonus for favorites that are due for repurchase
pub const REPURCHASE_BONUS: Decimal = Decimal::from_parts(20, 0, 0, false, 0);

/// Bonus for products matching the current hour-of-day habit
pub const TEMPORAL_BONUS: Decimal = Decimal::from_parts(15, 0, 0, false, 0);

/// Cold-start scores are drawn uniformly from this range, in hundredths.
pub const COLD_START_SCORE_RANGE_CENTS: (i64, i64) = (650, 850);
