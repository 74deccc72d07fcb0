//! The four candidate strategies.
//!
//! Each strategy gathers what it needs through the ports, then hands the data
//! to a pure `score_*` function. Lookup failures degrade the strategy instead
//! of aborting the run.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::RecommendationsConfig;
use crate::domain::behavior::{round_half_up, BehaviorProfile};
use crate::domain::product::{Category, Product, ProductId};
use crate::domain::recommendation::{Recommendation, RecommendationType};
use crate::domain::user::UserId;
use crate::recommendations::ports::{BehaviorProfileStore, ProductCatalog};
use crate::recommendations::types::{Candidate, SimilarUser, StrategyKind, StrategyOutcome};
use crate::recommendations::{
    COLLABORATIVE_FACTOR, CONTENT_BASED_BONUS, NEUTRAL_CATEGORY_AFFINITY, REPURCHASE_BONUS,
    TEMPORAL_BONUS,
};

/// Products a strategy must not propose for the current run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Exclusions {
    purchased: HashSet<ProductId>,
    recommended: HashSet<ProductId>,
}

impl Exclusions {
    pub fn new(purchased: HashSet<ProductId>, recommended: HashSet<ProductId>) -> Self {
        Self { purchased, recommended }
    }

    pub fn from_state(profiles: &[BehaviorProfile], existing: &[Recommendation]) -> Self {
        Self {
            purchased: profiles.iter().map(|profile| profile.product_id.clone()).collect(),
            recommended: existing.iter().map(|row| row.product_id.clone()).collect(),
        }
    }

    /// Discovery strategies skip anything bought or already pending.
    pub fn blocks_discovery(&self, product_id: &ProductId) -> bool {
        self.purchased.contains(product_id) || self.recommended.contains(product_id)
    }

    /// Resurfacing strategies work on purchased products and only skip pending rows.
    pub fn blocks_resurface(&self, product_id: &ProductId) -> bool {
        self.recommended.contains(product_id)
    }
}

/// Snapshot shared by all strategies during one regeneration.
pub struct StrategyContext<'a> {
    pub user_id: &'a UserId,
    pub now: DateTime<Utc>,
    pub local_hour: u8,
    /// The user's profiles, highest affinity first.
    pub profiles: &'a [BehaviorProfile],
    pub exclusions: &'a Exclusions,
    pub profile_store: &'a dyn BehaviorProfileStore,
    pub catalog: &'a dyn ProductCatalog,
    pub settings: &'a RecommendationsConfig,
}

#[async_trait]
pub trait ScoringStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn propose(&self, ctx: &StrategyContext<'_>) -> StrategyOutcome;
}

/// Strategies in the order regeneration runs them.
pub fn default_strategies() -> Vec<Box<dyn ScoringStrategy>> {
    vec![
        Box::new(ContentBasedStrategy),
        Box::new(CollaborativeStrategy),
        Box::new(RepurchaseStrategy),
        Box::new(TemporalStrategy),
    ]
}

// ---------------------------------------------------------------------------
// Content-based
// ---------------------------------------------------------------------------

/// Available catalog products of one category next to the user's history there.
#[derive(Clone, Debug)]
pub struct CategoryGroup {
    pub category: Category,
    pub user_profiles: Vec<BehaviorProfile>,
    pub available: Vec<Product>,
}

pub fn score_content_based(
    groups: &[CategoryGroup],
    exclusions: &Exclusions,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for group in groups {
        // A category with no history scores flat, without the bonus.
        let score = average_affinity(&group.user_profiles)
            .map_or(NEUTRAL_CATEGORY_AFFINITY, |average| average + CONTENT_BASED_BONUS);

        for product in &group.available {
            if !product.available || exclusions.blocks_discovery(&product.id) {
                continue;
            }
            candidates.push(Candidate {
                product: product.clone(),
                score,
                kind: RecommendationType::PreferredCategory,
            });
        }
    }

    rank(candidates, limit)
}

pub struct ContentBasedStrategy;

#[async_trait]
impl ScoringStrategy for ContentBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContentBased
    }

    async fn propose(&self, ctx: &StrategyContext<'_>) -> StrategyOutcome {
        let categories = distinct_categories(ctx.profiles);
        let mut groups = Vec::with_capacity(categories.len());
        let mut failures = Vec::new();

        for category in &categories {
            let user_profiles =
                match ctx.profile_store.find_by_user_and_category(ctx.user_id, category).await {
                    Ok(profiles) => profiles,
                    Err(error) => {
                        failures.push(format!("profiles in `{category}`: {error}"));
                        continue;
                    }
                };
            let available = match ctx.catalog.find_available_by_category(category).await {
                Ok(products) => products,
                Err(error) => {
                    failures.push(format!("catalog for `{category}`: {error}"));
                    continue;
                }
            };
            groups.push(CategoryGroup { category: category.clone(), user_profiles, available });
        }

        let candidates =
            score_content_based(&groups, ctx.exclusions, ctx.settings.content_based_limit);
        StrategyOutcome::from_parts(candidates, failures, categories.len())
    }
}

// ---------------------------------------------------------------------------
// Collaborative
// ---------------------------------------------------------------------------

/// A similar user together with their favorite profiles.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub similar: SimilarUser,
    pub favorites: Vec<BehaviorProfile>,
}

/// Proposes neighbors' favorites; a product reached through several neighbors keeps its best score.
pub fn score_collaborative(
    neighbors: &[Neighbor],
    products: &HashMap<ProductId, Product>,
    exclusions: &Exclusions,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut positions: HashMap<ProductId, usize> = HashMap::new();

    for neighbor in neighbors {
        for favorite in neighbor.favorites.iter().filter(|profile| profile.is_favorite) {
            let Some(product) = products.get(&favorite.product_id) else {
                continue;
            };
            if !product.available || exclusions.blocks_discovery(&product.id) {
                continue;
            }

            let score = round_half_up(favorite.affinity_score * COLLABORATIVE_FACTOR);
            match positions.get(&product.id) {
                Some(&position) => {
                    if score > candidates[position].score {
                        candidates[position].score = score;
                    }
                }
                None => {
                    positions.insert(product.id.clone(), candidates.len());
                    candidates.push(Candidate {
                        product: product.clone(),
                        score,
                        kind: RecommendationType::SimilarUsers,
                    });
                }
            }
        }
    }

    rank(candidates, limit)
}

pub struct CollaborativeStrategy;

#[async_trait]
impl ScoringStrategy for CollaborativeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Collaborative
    }

    async fn propose(&self, ctx: &StrategyContext<'_>) -> StrategyOutcome {
        let similar = match ctx
            .profile_store
            .find_similar_users(ctx.user_id, ctx.settings.similar_user_min_matches)
            .await
        {
            Ok(similar) => similar,
            Err(error) => return StrategyOutcome::Failed(format!("similar users: {error}")),
        };

        let mut neighbors = Vec::with_capacity(similar.len());
        let mut failures = Vec::new();
        for similar_user in similar {
            match ctx.profile_store.find_favorites_by_user(&similar_user.user_id).await {
                Ok(favorites) => neighbors.push(Neighbor { similar: similar_user, favorites }),
                Err(error) => {
                    failures.push(format!("favorites of {}: {error}", similar_user.user_id))
                }
            }
        }
        let attempted = neighbors.len() + failures.len();

        let wanted = neighbors
            .iter()
            .flat_map(|neighbor| neighbor.favorites.iter())
            .filter(|profile| !ctx.exclusions.blocks_discovery(&profile.product_id))
            .map(|profile| profile.product_id.clone())
            .collect::<Vec<_>>();
        let products = resolve_products(ctx.catalog, wanted, &mut failures).await;

        let candidates = score_collaborative(
            &neighbors,
            &products,
            ctx.exclusions,
            ctx.settings.collaborative_limit,
        );
        StrategyOutcome::from_parts(candidates, failures, attempted)
    }
}

// ---------------------------------------------------------------------------
// Affinity / repurchase
// ---------------------------------------------------------------------------

/// Favorites whose last purchase is at least `after_days` whole days old.
pub fn due_for_repurchase<'a>(
    favorites: &'a [BehaviorProfile],
    now: DateTime<Utc>,
    after_days: u32,
) -> Vec<&'a BehaviorProfile> {
    favorites
        .iter()
        .filter(|profile| profile.is_favorite)
        .filter(|profile| profile.days_since_last_purchase(now) >= i64::from(after_days))
        .collect()
}

pub fn score_repurchase(
    due: &[&BehaviorProfile],
    products: &HashMap<ProductId, Product>,
    exclusions: &Exclusions,
) -> Vec<Candidate> {
    resurface(due, products, exclusions, REPURCHASE_BONUS, RecommendationType::FavoriteRepurchase)
}

pub struct RepurchaseStrategy;

#[async_trait]
impl ScoringStrategy for RepurchaseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Repurchase
    }

    async fn propose(&self, ctx: &StrategyContext<'_>) -> StrategyOutcome {
        let favorites = match ctx.profile_store.find_favorites_by_user(ctx.user_id).await {
            Ok(favorites) => favorites,
            Err(error) => return StrategyOutcome::Failed(format!("favorites: {error}")),
        };

        let due = due_for_repurchase(&favorites, ctx.now, ctx.settings.repurchase_after_days);
        let mut failures = Vec::new();
        let wanted = due.iter().map(|profile| profile.product_id.clone()).collect::<Vec<_>>();
        let attempted = wanted.len();
        let products = resolve_products(ctx.catalog, wanted, &mut failures).await;

        StrategyOutcome::from_parts(
            score_repurchase(&due, &products, ctx.exclusions),
            failures,
            attempted,
        )
    }
}

// ---------------------------------------------------------------------------
// Temporal
// ---------------------------------------------------------------------------

pub fn score_temporal(
    profiles: &[BehaviorProfile],
    hour: u8,
    products: &HashMap<ProductId, Product>,
    exclusions: &Exclusions,
) -> Vec<Candidate> {
    let at_hour =
        profiles.iter().filter(|profile| profile.preferred_hour == hour).collect::<Vec<_>>();
    resurface(&at_hour, products, exclusions, TEMPORAL_BONUS, RecommendationType::TemporalTrend)
}

pub struct TemporalStrategy;

#[async_trait]
impl ScoringStrategy for TemporalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Temporal
    }

    async fn propose(&self, ctx: &StrategyContext<'_>) -> StrategyOutcome {
        let at_hour =
            match ctx.profile_store.find_by_user_and_hour(ctx.user_id, ctx.local_hour).await {
                Ok(profiles) => profiles,
                Err(error) => return StrategyOutcome::Failed(format!("hourly profiles: {error}")),
            };

        let mut failures = Vec::new();
        let wanted = at_hour.iter().map(|profile| profile.product_id.clone()).collect::<Vec<_>>();
        let attempted = wanted.len();
        let products = resolve_products(ctx.catalog, wanted, &mut failures).await;

        StrategyOutcome::from_parts(
            score_temporal(&at_hour, ctx.local_hour, &products, ctx.exclusions),
            failures,
            attempted,
        )
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn resurface(
    profiles: &[&BehaviorProfile],
    products: &HashMap<ProductId, Product>,
    exclusions: &Exclusions,
    bonus: Decimal,
    kind: RecommendationType,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    profiles
        .iter()
        .filter_map(|profile| {
            let product = products.get(&profile.product_id)?;
            if !product.available
                || exclusions.blocks_resurface(&product.id)
                || !seen.insert(product.id.clone())
            {
                return None;
            }
            Some(Candidate { product: product.clone(), score: profile.affinity_score + bonus, kind })
        })
        .collect()
}

/// Looks up each distinct product once; missing products are skipped silently.
async fn resolve_products(
    catalog: &dyn ProductCatalog,
    product_ids: Vec<ProductId>,
    failures: &mut Vec<String>,
) -> HashMap<ProductId, Product> {
    let mut products = HashMap::new();
    let mut requested = HashSet::new();

    for product_id in product_ids {
        if !requested.insert(product_id.clone()) {
            continue;
        }
        match catalog.find_by_id(&product_id).await {
            Ok(Some(product)) => {
                products.insert(product_id, product);
            }
            Ok(None) => {}
            Err(error) => failures.push(format!("product {product_id}: {error}")),
        }
    }

    products
}

fn distinct_categories(profiles: &[BehaviorProfile]) -> Vec<Category> {
    let mut seen = HashSet::new();
    profiles
        .iter()
        .filter(|profile| seen.insert(profile.category.clone()))
        .map(|profile| profile.category.clone())
        .collect()
}

fn average_affinity(profiles: &[BehaviorProfile]) -> Option<Decimal> {
    if profiles.is_empty() {
        return None;
    }
    let total: Decimal = profiles.iter().map(|profile| profile.affinity_score).sum();
    Some(round_half_up(total / Decimal::from(profiles.len())))
}

/// Highest score first; ties keep their discovery order.
fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates.truncate(limit);
    candidates
}
