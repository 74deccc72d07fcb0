//! Value types flowing between strategies, the engine and its callers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::behavior::BehaviorProfile;
use crate::domain::product::{Category, Product, StoreId};
use crate::domain::recommendation::{Recommendation, RecommendationType};
use crate::domain::user::UserId;

/// A product proposed by a strategy before dedup and persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub product: Product,
    pub score: Decimal,
    pub kind: RecommendationType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ContentBased,
    Collaborative,
    Repurchase,
    Temporal,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentBased => "content_based",
            Self::Collaborative => "collaborative",
            Self::Repurchase => "repurchase",
            Self::Temporal => "temporal",
        }
    }
}

/// Result of one strategy run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrategyOutcome {
    Succeeded(Vec<Candidate>),
    /// Some lookups failed; the candidates cover only what could be read.
    Degraded { candidates: Vec<Candidate>, reason: String },
    Failed(String),
}

impl StrategyOutcome {
    /// Picks the outcome for a run that produced `candidates` with `failures` along the way.
    pub fn from_parts(candidates: Vec<Candidate>, failures: Vec<String>, attempted: usize) -> Self {
        if failures.is_empty() {
            return Self::Succeeded(candidates);
        }
        if candidates.is_empty() && failures.len() >= attempted {
            return Self::Failed(failures.join("; "));
        }
        Self::Degraded { candidates, reason: failures.join("; ") }
    }

    pub fn status(&self) -> StrategyStatus {
        match self {
            Self::Succeeded(_) => StrategyStatus::Succeeded,
            Self::Degraded { .. } => StrategyStatus::Degraded,
            Self::Failed(_) => StrategyStatus::Failed,
        }
    }

    pub fn into_parts(self) -> (Vec<Candidate>, Option<String>) {
        match self {
            Self::Succeeded(candidates) => (candidates, None),
            Self::Degraded { candidates, reason } => (candidates, Some(reason)),
            Self::Failed(reason) => (Vec::new(), Some(reason)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Succeeded,
    Degraded,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy: StrategyKind,
    pub status: StrategyStatus,
    /// Candidates the strategy emitted.
    pub proposed: usize,
    /// Candidates that survived the in-run dedup.
    pub accepted: usize,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationReport {
    pub user_id: UserId,
    pub purged: u64,
    pub inserted: usize,
    pub strategies: Vec<StrategyReport>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub user_id: UserId,
    pub profiles: Vec<BehaviorProfile>,
    /// `None` when regeneration failed after the profiles were stored.
    pub regeneration: Option<RegenerationReport>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Stored,
    ColdStart,
    /// The store could not be read; presented to users as an empty feed.
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFeed {
    pub items: Vec<Recommendation>,
    pub source: FeedSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: Category,
    pub purchases: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTotal {
    pub store_id: StoreId,
    pub store_name: String,
    pub purchases: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInsights {
    pub user_id: UserId,
    pub profile_count: usize,
    pub favorite_count: usize,
    pub total_purchases: u64,
    pub average_affinity: Decimal,
    pub top_categories: Vec<CategoryTotal>,
    pub top_stores: Vec<StoreTotal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEffectiveness {
    pub recommendation_type: RecommendationType,
    pub total: usize,
    pub shown: usize,
    pub accepted: usize,
    /// Accepted rows over shown rows, as a percentage.
    pub conversion_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub profiles: u64,
    pub users: u64,
    pub recommendations: u64,
}

/// A user ranked by how many purchase signals they share with another user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarUser {
    pub user_id: UserId,
    pub matches: u32,
}
