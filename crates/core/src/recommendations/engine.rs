//! Regeneration, cold start and the query/feedback surface.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::RecommendationsConfig;
use crate::domain::behavior::{
    apply_purchase, local_hour, round_half_up, BehaviorProfile, PurchaseEvent, FAVORITE_THRESHOLD,
};
use crate::domain::order::CompletedOrder;
use crate::domain::product::{Category, Product, StoreId};
use crate::domain::recommendation::{Recommendation, RecommendationId, RecommendationType};
use crate::domain::user::UserId;
use crate::errors::ApplicationError;
use crate::recommendations::ports::{BehaviorProfileStore, ProductCatalog, RecommendationStore};
use crate::recommendations::reorder::partition_by_affinity;
use crate::recommendations::strategies::{
    default_strategies, Exclusions, ScoringStrategy, StrategyContext,
};
use crate::recommendations::types::{
    CategoryTotal, FeedSource, PurchaseOutcome, RecommendationFeed, RegenerationReport,
    StoreTotal, StrategyReport, StrategyStatus, SystemStatus, TypeEffectiveness, UserInsights,
};
use crate::recommendations::{RecommendationResult, COLD_START_SCORE_RANGE_CENTS};

const INSIGHT_TOP_N: usize = 5;

pub struct RecommendationEngine {
    profiles: Arc<dyn BehaviorProfileStore>,
    recommendations: Arc<dyn RecommendationStore>,
    catalog: Arc<dyn ProductCatalog>,
    strategies: Vec<Box<dyn ScoringStrategy>>,
    settings: RecommendationsConfig,
}

impl RecommendationEngine {
    pub fn new(
        profiles: Arc<dyn BehaviorProfileStore>,
        recommendations: Arc<dyn RecommendationStore>,
        catalog: Arc<dyn ProductCatalog>,
        settings: RecommendationsConfig,
    ) -> Self {
        Self { profiles, recommendations, catalog, strategies: default_strategies(), settings }
    }

    /// Replaces the strategy list; strategies run in the given order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ScoringStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn settings(&self) -> &RecommendationsConfig {
        &self.settings
    }

    pub async fn on_purchase_completed(
        &self,
        order: &CompletedOrder,
    ) -> RecommendationResult<PurchaseOutcome> {
        self.on_purchase_completed_at(order, Utc::now()).await
    }

    /// Folds every line of `order` into the buyer's profiles, then regenerates.
    ///
    /// All products are resolved before any profile is written, so an unknown
    /// product rejects the whole order. A failed regeneration is logged and
    /// reported as `regeneration: None`; the profile updates stand.
    pub async fn on_purchase_completed_at(
        &self,
        order: &CompletedOrder,
        now: DateTime<Utc>,
    ) -> RecommendationResult<PurchaseOutcome> {
        order.validate()?;

        let hour = local_hour(order.completed_at, self.settings.utc_offset_minutes);
        let mut events = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let product = self.catalog.find_by_id(&line.product_id).await?.ok_or_else(|| {
                ApplicationError::NotFound(format!("product {}", line.product_id))
            })?;
            events.push(PurchaseEvent {
                user_id: order.user_id.clone(),
                product,
                quantity: line.quantity,
                line_amount: line.line_amount()?,
                purchased_at: order.completed_at,
                local_hour: hour,
            });
        }

        let mut profiles = Vec::with_capacity(events.len());
        for event in &events {
            let previous = self.profiles.find_profile(&event.user_id, &event.product.id).await?;
            let updated = apply_purchase(previous.as_ref(), event, now);
            self.profiles.save_profile(updated.clone()).await?;
            profiles.push(updated);
        }

        info!(
            event_name = "recommendations.purchase.recorded",
            user_id = %order.user_id,
            order_id = %order.order_id.0,
            lines = profiles.len(),
            "behavior profiles updated"
        );

        let regeneration = match self.regenerate_at(&order.user_id, now).await {
            Ok(report) => Some(report),
            Err(error) => {
                warn!(
                    event_name = "recommendations.regenerate.failed",
                    user_id = %order.user_id,
                    error = %error,
                    "regeneration after purchase failed"
                );
                None
            }
        };

        Ok(PurchaseOutcome { user_id: order.user_id.clone(), profiles, regeneration })
    }

    pub async fn regenerate(&self, user_id: &UserId) -> RecommendationResult<RegenerationReport> {
        self.regenerate_at(user_id, Utc::now()).await
    }

    /// Purges expired rows, runs every strategy and batch-inserts the merged candidates.
    ///
    /// Candidates are deduplicated by product within the run (first strategy
    /// wins) and against rows that survived the purge. Concurrent runs for the
    /// same user may still insert duplicates.
    pub async fn regenerate_at(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> RecommendationResult<RegenerationReport> {
        let cutoff = now - Duration::days(i64::from(self.settings.retention_days));
        let purged = self.recommendations.delete_generated_before(user_id, cutoff).await?;

        let profiles = self.profiles.find_profiles_by_user(user_id).await?;
        let existing = self.recommendations.list_for_user(user_id).await?;
        let exclusions = Exclusions::from_state(&profiles, &existing);

        let ctx = StrategyContext {
            user_id,
            now,
            local_hour: local_hour(now, self.settings.utc_offset_minutes),
            profiles: &profiles,
            exclusions: &exclusions,
            profile_store: self.profiles.as_ref(),
            catalog: self.catalog.as_ref(),
            settings: &self.settings,
        };

        let mut claimed = HashSet::new();
        let mut rows = Vec::new();
        let mut reports = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let outcome = strategy.propose(&ctx).await;
            let status = outcome.status();
            let (candidates, detail) = outcome.into_parts();

            if let Some(reason) = &detail {
                let event_name = match status {
                    StrategyStatus::Failed => "recommendations.strategy.failed",
                    _ => "recommendations.strategy.degraded",
                };
                warn!(
                    event_name,
                    user_id = %user_id,
                    strategy = strategy.kind().as_str(),
                    status = ?status,
                    reason = %reason,
                    "strategy did not complete cleanly"
                );
            }

            let proposed = candidates.len();
            let mut accepted = 0;
            for candidate in candidates {
                if claimed.insert(candidate.product.id.clone()) {
                    rows.push(Recommendation::new(
                        user_id.clone(),
                        &candidate.product,
                        candidate.score,
                        candidate.kind,
                        now,
                    ));
                    accepted += 1;
                }
            }

            reports.push(StrategyReport {
                strategy: strategy.kind(),
                status,
                proposed,
                accepted,
                detail,
            });
        }

        let inserted = rows.len();
        if !rows.is_empty() {
            self.recommendations.save_all(rows).await?;
        }

        info!(
            event_name = "recommendations.regenerate.completed",
            user_id = %user_id,
            purged,
            inserted,
            "recommendations regenerated"
        );

        Ok(RegenerationReport {
            user_id: user_id.clone(),
            purged,
            inserted,
            strategies: reports,
            generated_at: now,
        })
    }

    pub async fn get_recommendations(&self, user_id: &UserId, limit: usize) -> RecommendationFeed {
        self.get_recommendations_at(user_id, limit, Utc::now()).await
    }

    /// Top rows by predicted score. An empty set triggers cold start once.
    ///
    /// Never fails: an unreadable store yields an empty feed marked `Unavailable`.
    pub async fn get_recommendations_at(
        &self,
        user_id: &UserId,
        limit: usize,
        now: DateTime<Utc>,
    ) -> RecommendationFeed {
        if limit == 0 {
            return RecommendationFeed { items: Vec::new(), source: FeedSource::Stored };
        }

        match self.recommendations.top_for_user(user_id, limit).await {
            Ok(items) if !items.is_empty() => {
                return RecommendationFeed { items, source: FeedSource::Stored };
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    event_name = "recommendations.read.failed",
                    user_id = %user_id,
                    error = %error,
                    "recommendation store unreadable, serving empty feed"
                );
                return RecommendationFeed { items: Vec::new(), source: FeedSource::Unavailable };
            }
        }

        match self.cold_start_at(user_id, now).await {
            Ok(created) => info!(
                event_name = "recommendations.cold_start.completed",
                user_id = %user_id,
                created,
                "cold start recommendations created"
            ),
            Err(error) => warn!(
                event_name = "recommendations.cold_start.failed",
                user_id = %user_id,
                error = %error,
                "cold start failed"
            ),
        }

        match self.recommendations.top_for_user(user_id, limit).await {
            Ok(items) if items.is_empty() => {
                RecommendationFeed { items, source: FeedSource::Stored }
            }
            Ok(items) => RecommendationFeed { items, source: FeedSource::ColdStart },
            Err(error) => {
                warn!(
                    event_name = "recommendations.read.failed",
                    user_id = %user_id,
                    error = %error,
                    "recommendation store unreadable after cold start"
                );
                RecommendationFeed { items: Vec::new(), source: FeedSource::Unavailable }
            }
        }
    }

    async fn cold_start_at(&self, user_id: &UserId, now: DateTime<Utc>) -> RecommendationResult<usize> {
        let available = self.catalog.list_available().await?;
        let mut rng = StdRng::from_entropy();
        let picks = cold_start_picks(available, self.settings.cold_start_size, &mut rng);

        let mut rows = Vec::with_capacity(picks.len());
        for (product, score) in picks {
            if self.recommendations.exists(user_id, &product.id).await? {
                continue;
            }
            rows.push(Recommendation::new(
                user_id.clone(),
                &product,
                score,
                RecommendationType::PreferredCategory,
                now,
            ));
        }

        let created = rows.len();
        if created > 0 {
            self.recommendations.save_all(rows).await?;
        }
        Ok(created)
    }

    pub async fn mark_shown(&self, id: &RecommendationId) -> RecommendationResult<bool> {
        self.mark_shown_at(id, Utc::now()).await
    }

    /// Returns `false` when no row has this id, including one purged mid-update.
    pub async fn mark_shown_at(
        &self,
        id: &RecommendationId,
        now: DateTime<Utc>,
    ) -> RecommendationResult<bool> {
        let Some(mut recommendation) = self.recommendations.find_by_id(id).await? else {
            return Ok(false);
        };
        recommendation.mark_shown(now);
        Ok(self.recommendations.save(recommendation).await?)
    }

    pub async fn mark_accepted(&self, id: &RecommendationId) -> RecommendationResult<bool> {
        self.mark_accepted_at(id, Utc::now()).await
    }

    /// Returns `false` when no row has this id, including one purged mid-update.
    pub async fn mark_accepted_at(
        &self,
        id: &RecommendationId,
        now: DateTime<Utc>,
    ) -> RecommendationResult<bool> {
        let Some(mut recommendation) = self.recommendations.find_by_id(id).await? else {
            return Ok(false);
        };
        recommendation.mark_accepted(now);
        let user_id = recommendation.user_id.clone();
        if !self.recommendations.save(recommendation).await? {
            return Ok(false);
        }

        info!(
            event_name = "recommendations.feedback.accepted",
            recommendation_id = %id,
            user_id = %user_id,
            "recommendation accepted"
        );
        Ok(true)
    }

    /// Categories of products bought at least twice, most purchased first.
    pub async fn preferred_categories(&self, user_id: &UserId) -> RecommendationResult<Vec<Category>> {
        let mut profiles = self.profiles.find_profiles_by_user(user_id).await?;
        profiles.sort_by(|a, b| b.purchase_count.cmp(&a.purchase_count));

        let mut seen = HashSet::new();
        Ok(profiles
            .into_iter()
            .filter(|profile| profile.purchase_count >= FAVORITE_THRESHOLD)
            .filter_map(|profile| seen.insert(profile.category.clone()).then_some(profile.category))
            .collect())
    }

    /// Reorders `products` by the user's history; any failure returns the input as given.
    pub async fn reorder_by_affinity(&self, products: Vec<Product>, user_id: &UserId) -> Vec<Product> {
        match self.profiles.find_profiles_by_user(user_id).await {
            Ok(profiles) => partition_by_affinity(products, &profiles),
            Err(error) => {
                warn!(
                    event_name = "recommendations.reorder.degraded",
                    user_id = %user_id,
                    error = %error,
                    "returning products in original order"
                );
                products
            }
        }
    }

    pub async fn profiles_for_user(
        &self,
        user_id: &UserId,
    ) -> RecommendationResult<Vec<BehaviorProfile>> {
        Ok(self.profiles.find_profiles_by_user(user_id).await?)
    }

    /// Every stored row for the user, highest score first, without cold start.
    pub async fn recommendations_for_user(
        &self,
        user_id: &UserId,
    ) -> RecommendationResult<Vec<Recommendation>> {
        Ok(self.recommendations.list_for_user(user_id).await?)
    }

    pub async fn user_insights(&self, user_id: &UserId) -> RecommendationResult<UserInsights> {
        let profiles = self.profiles.find_profiles_by_user(user_id).await?;
        Ok(summarize_insights(user_id, &profiles))
    }

    pub async fn effectiveness_stats(
        &self,
        user_id: &UserId,
    ) -> RecommendationResult<Vec<TypeEffectiveness>> {
        let rows = self.recommendations.list_for_user(user_id).await?;
        Ok(effectiveness_by_type(&rows))
    }

    pub async fn status(&self) -> RecommendationResult<SystemStatus> {
        Ok(SystemStatus {
            profiles: self.profiles.count_profiles().await?,
            users: self.profiles.count_users().await?,
            recommendations: self.recommendations.count().await?,
        })
    }
}

/// Shuffles the available products and assigns each kept one a score in the cold-start range.
pub fn cold_start_picks<R: Rng>(
    mut products: Vec<Product>,
    size: usize,
    rng: &mut R,
) -> Vec<(Product, Decimal)> {
    products.retain(|product| product.available);
    products.shuffle(rng);
    products.truncate(size);

    let (low, high) = COLD_START_SCORE_RANGE_CENTS;
    products
        .into_iter()
        .map(|product| {
            let cents = rng.gen_range(low..=high);
            (product, Decimal::new(cents, 2))
        })
        .collect()
}

pub fn summarize_insights(user_id: &UserId, profiles: &[BehaviorProfile]) -> UserInsights {
    let total_purchases: u64 = profiles.iter().map(|profile| u64::from(profile.purchase_count)).sum();
    let average_affinity = if profiles.is_empty() {
        Decimal::ZERO
    } else {
        let total: Decimal = profiles.iter().map(|profile| profile.affinity_score).sum();
        round_half_up(total / Decimal::from(profiles.len()))
    };

    let mut by_category: HashMap<&Category, u64> = HashMap::new();
    let mut by_store: HashMap<&StoreId, (&str, u64)> = HashMap::new();
    for profile in profiles {
        let count = u64::from(profile.purchase_count);
        *by_category.entry(&profile.category).or_insert(0) += count;
        by_store.entry(&profile.store_id).or_insert((profile.store_name.as_str(), 0)).1 += count;
    }

    let mut top_categories = by_category
        .into_iter()
        .map(|(category, purchases)| CategoryTotal { category: category.clone(), purchases })
        .collect::<Vec<_>>();
    top_categories
        .sort_by(|a, b| b.purchases.cmp(&a.purchases).then_with(|| a.category.cmp(&b.category)));
    top_categories.truncate(INSIGHT_TOP_N);

    let mut top_stores = by_store
        .into_iter()
        .map(|(store_id, (store_name, purchases))| StoreTotal {
            store_id: store_id.clone(),
            store_name: store_name.to_owned(),
            purchases,
        })
        .collect::<Vec<_>>();
    top_stores
        .sort_by(|a, b| b.purchases.cmp(&a.purchases).then_with(|| a.store_id.cmp(&b.store_id)));
    top_stores.truncate(INSIGHT_TOP_N);

    UserInsights {
        user_id: user_id.clone(),
        profile_count: profiles.len(),
        favorite_count: profiles.iter().filter(|profile| profile.is_favorite).count(),
        total_purchases,
        average_affinity,
        top_categories,
        top_stores,
    }
}

/// Per-type totals with the accepted-over-shown conversion rate.
pub fn effectiveness_by_type(rows: &[Recommendation]) -> Vec<TypeEffectiveness> {
    let mut tallies: BTreeMap<RecommendationType, (usize, usize, usize, usize)> = BTreeMap::new();
    for row in rows {
        let tally = tallies.entry(row.recommendation_type).or_default();
        tally.0 += 1;
        if row.times_shown > 0 {
            tally.1 += 1;
        }
        if row.was_accepted {
            tally.2 += 1;
        }
        if row.times_shown > 0 && row.was_accepted {
            tally.3 += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(recommendation_type, (total, shown, accepted, converted))| {
            let conversion_rate = if shown == 0 {
                Decimal::ZERO
            } else {
                round_half_up(
                    Decimal::from(converted) * Decimal::ONE_HUNDRED / Decimal::from(shown),
                )
            };
            TypeEffectiveness { recommendation_type, total, shown, accepted, conversion_rate }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal::Decimal;

    use super::{cold_start_picks, effectiveness_by_type, summarize_insights};
    use crate::domain::behavior::BehaviorProfile;
    use crate::domain::product::{Category, Product, ProductId, StoreId};
    use crate::domain::recommendation::{Recommendation, RecommendationType};
    use crate::domain::user::UserId;

    fn product(id: &str, available: bool) -> Product {
        Product {
            id: ProductId(id.to_owned()),
            name: id.to_owned(),
            price: Decimal::new(4200, 2),
            image_ref: None,
            category: Category::parse("snacks").expect("valid category"),
            store_id: StoreId("s-1".to_owned()),
            store_name: "Kiosko".to_owned(),
            available,
        }
    }

    fn profile(product: &str, category: &str, store: &str, count: u32, affinity: i64) -> BehaviorProfile {
        let now = Utc::now();
        BehaviorProfile {
            user_id: UserId("u-1".to_owned()),
            product_id: ProductId(product.to_owned()),
            product_name: product.to_owned(),
            category: Category::parse(category).expect("valid category"),
            store_id: StoreId(store.to_owned()),
            store_name: format!("Store {store}"),
            purchase_count: count,
            total_spent: Decimal::TEN,
            average_quantity: Some(Decimal::ONE),
            is_favorite: count >= 2,
            affinity_score: Decimal::new(affinity, 0),
            preferred_hour: 12,
            last_purchase_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cold_start_picks_at_most_size_available_products_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut products = (0..12).map(|n| product(&format!("p-{n}"), true)).collect::<Vec<_>>();
        products.push(product("p-agotado", false));

        let picks = cold_start_picks(products, 8, &mut rng);

        assert_eq!(picks.len(), 8);
        for (product, score) in &picks {
            assert!(product.available);
            assert!(*score >= Decimal::new(65, 1) && *score <= Decimal::new(85, 1), "{score}");
        }
    }

    #[test]
    fn cold_start_picks_everything_from_small_catalog() {
        let mut rng = StdRng::seed_from_u64(11);
        let picks = cold_start_picks(vec![product("p-1", true), product("p-2", true)], 8, &mut rng);

        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn insights_aggregate_categories_and_stores() {
        let profiles = vec![
            profile("p-cafe", "bebidas", "s-1", 5, 80),
            profile("p-te", "bebidas", "s-2", 1, 20),
            profile("p-arepa", "comida", "s-2", 3, 50),
        ];

        let insights = summarize_insights(&UserId("u-1".to_owned()), &profiles);

        assert_eq!(insights.profile_count, 3);
        assert_eq!(insights.favorite_count, 2);
        assert_eq!(insights.total_purchases, 9);
        assert_eq!(insights.average_affinity, Decimal::new(50, 0));
        assert_eq!(insights.top_categories[0].category.as_str(), "bebidas");
        assert_eq!(insights.top_categories[0].purchases, 6);
        assert_eq!(insights.top_stores[0].store_id, StoreId("s-1".to_owned()));
        assert_eq!(insights.top_stores[0].purchases, 5);
        assert_eq!(insights.top_stores[1].purchases, 4);
    }

    #[test]
    fn effectiveness_reports_conversion_over_shown_rows() {
        let base = product("p-1", true);
        let now = Utc::now();
        let user = UserId("u-1".to_owned());
        let mut shown_accepted =
            Recommendation::new(user.clone(), &base, Decimal::TEN, RecommendationType::SimilarUsers, now);
        shown_accepted.mark_shown(now);
        shown_accepted.mark_accepted(now);
        let mut shown_only =
            Recommendation::new(user.clone(), &base, Decimal::TEN, RecommendationType::SimilarUsers, now);
        shown_only.mark_shown(now);
        let never_shown =
            Recommendation::new(user, &base, Decimal::TEN, RecommendationType::TemporalTrend, now);

        let stats = effectiveness_by_type(&[shown_accepted, shown_only, never_shown]);

        assert_eq!(stats.len(), 2);
        let similar = &stats[0];
        assert_eq!(similar.recommendation_type, RecommendationType::SimilarUsers);
        assert_eq!((similar.total, similar.shown, similar.accepted), (2, 2, 1));
        assert_eq!(similar.conversion_rate, Decimal::new(50, 0));
        assert_eq!(stats[1].conversion_rate, Decimal::ZERO);
    }
}
