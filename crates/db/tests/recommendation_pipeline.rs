use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use tastebud_core::config::RecommendationsConfig;
use tastebud_core::domain::behavior::BehaviorProfile;
use tastebud_core::domain::order::{CompletedOrder, OrderId, OrderLine};
use tastebud_core::domain::product::{Category, Product, ProductId, StoreId};
use tastebud_core::domain::recommendation::{Recommendation, RecommendationId, RecommendationType};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::{ApplicationError, DomainError, StoreError};
use tastebud_core::recommendations::{
    BehaviorProfileStore, FeedSource, ProductCatalog, RecommendationEngine, RecommendationStore, SimilarUser,
    StrategyKind, StrategyStatus,
};
use tastebud_db::{
    connect_with_settings, migrations, CampusDemoDataset, InMemoryBehaviorProfileStore,
    InMemoryProductCatalog, InMemoryRecommendationStore, SqlBehaviorProfileRepository,
    SqlProductRepository, SqlRecommendationRepository,
};

struct Harness {
    engine: RecommendationEngine,
    profiles: Arc<InMemoryBehaviorProfileStore>,
    recommendations: Arc<InMemoryRecommendationStore>,
    catalog: Arc<InMemoryProductCatalog>,
}

impl Harness {
    fn new() -> Self {
        let profiles = Arc::new(InMemoryBehaviorProfileStore::default());
        let recommendations = Arc::new(InMemoryRecommendationStore::default());
        let catalog = Arc::new(InMemoryProductCatalog::default());
        let engine = RecommendationEngine::new(
            profiles.clone(),
            recommendations.clone(),
            catalog.clone(),
            RecommendationsConfig::default(),
        );
        Self { engine, profiles, recommendations, catalog }
    }

    async fn stock(&self, products: Vec<Product>) {
        for product in products {
            self.catalog.save(product).await;
        }
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).single().expect("valid timestamp")
}

fn user(id: &str) -> UserId {
    UserId(id.to_owned())
}

fn product(id: &str, category: &str, available: bool) -> Product {
    Product {
        id: ProductId(id.to_owned()),
        name: format!("Product {id}"),
        price: Decimal::new(1000, 2),
        image_ref: None,
        category: Category::parse(category).expect("valid category"),
        store_id: StoreId("s-cafeteria".to_owned()),
        store_name: "Cafeteria Central".to_owned(),
        available,
    }
}

fn order(id: &str, user_id: &str, completed_at: DateTime<Utc>, lines: &[(&str, u32)]) -> CompletedOrder {
    CompletedOrder {
        order_id: OrderId(id.to_owned()),
        user_id: user(user_id),
        completed_at,
        lines: lines
            .iter()
            .map(|(product_id, quantity)| OrderLine {
                product_id: ProductId((*product_id).to_owned()),
                quantity: *quantity,
                unit_price: Decimal::new(1000, 2),
            })
            .collect(),
    }
}

fn product_ids(rows: &[Recommendation]) -> BTreeSet<String> {
    rows.iter().map(|row| row.product_id.0.clone()).collect()
}

#[tokio::test]
async fn repeated_purchase_at_two_pm_builds_a_favorite_with_temporal_and_repurchase_rows() {
    let harness = Harness::new();
    harness
        .stock(vec![
            product("p1", "bebidas", true),
            product("p2", "bebidas", true),
            product("p3", "snacks", true),
        ])
        .await;

    for (index, day) in [2, 3, 4].into_iter().enumerate() {
        let completed_at = at(day, 14);
        let placed = order(&format!("o-{index}"), "u-1", completed_at, &[("p1", 1)]);
        harness.engine.on_purchase_completed_at(&placed, completed_at).await.expect("purchase");
    }

    let profile = harness
        .profiles
        .find_profile(&user("u-1"), &ProductId("p1".to_owned()))
        .await
        .expect("read profile")
        .expect("profile exists");
    assert_eq!(profile.purchase_count, 3);
    assert!(profile.is_favorite);
    assert_eq!(profile.preferred_hour, 14);

    // Same day as the last purchase: the habit shows up, repurchase is not due yet.
    let rows = harness.engine.recommendations_for_user(&user("u-1")).await.expect("rows");
    assert!(rows.iter().any(|row| {
        row.product_id.0 == "p1" && row.recommendation_type == RecommendationType::TemporalTrend
    }));
    assert!(rows.iter().all(|row| row.recommendation_type != RecommendationType::FavoriteRepurchase));
    assert!(rows.iter().all(|row| row.product_id.0 != "p3"));

    // Five days later the original rows have aged out and the favorite is due again.
    let report = harness.engine.regenerate_at(&user("u-1"), at(10, 9)).await.expect("regenerate");
    assert_eq!(report.purged, 2);

    let rows = harness.engine.recommendations_for_user(&user("u-1")).await.expect("rows");
    let repurchase = rows
        .iter()
        .find(|row| row.recommendation_type == RecommendationType::FavoriteRepurchase)
        .expect("repurchase row");
    assert_eq!(repurchase.product_id.0, "p1");
    assert_eq!(repurchase.predicted_score, profile.affinity_score + Decimal::new(20, 0));
    assert!(rows.iter().any(|row| {
        row.product_id.0 == "p2" && row.recommendation_type == RecommendationType::PreferredCategory
    }));
}

#[tokio::test]
async fn discovery_strategies_never_propose_purchased_products() {
    let harness = Harness::new();
    let anchor = at(9, 18);
    CampusDemoDataset::stock(&harness.catalog).await.expect("stock catalog");
    CampusDemoDataset::replay(&harness.engine, anchor).await.expect("replay history");

    // Past the retention window, so every remaining row comes from the current history.
    let later = anchor + Duration::days(8);
    for user_id in CampusDemoDataset::users() {
        harness.engine.regenerate_at(&user_id, later).await.expect("regenerate");

        let purchased = harness
            .engine
            .profiles_for_user(&user_id)
            .await
            .expect("profiles")
            .into_iter()
            .map(|profile| profile.product_id)
            .collect::<BTreeSet<_>>();
        let rows = harness.engine.recommendations_for_user(&user_id).await.expect("rows");

        for row in rows.iter().filter(|row| {
            matches!(
                row.recommendation_type,
                RecommendationType::PreferredCategory | RecommendationType::SimilarUsers
            )
        }) {
            assert!(
                !purchased.contains(&row.product_id),
                "{user_id} was offered already purchased {}",
                row.product_id
            );
        }

        let mut seen = BTreeSet::new();
        assert!(rows.iter().all(|row| seen.insert(row.product_id.clone())), "duplicate rows");
    }
}

#[tokio::test]
async fn collaborative_rows_come_from_neighbors_favorites() {
    let harness = Harness::new();
    harness
        .stock(vec![
            product("p-cafe", "bebidas", true),
            product("p-empanada", "snacks", true),
            product("p-brownie", "postres", true),
        ])
        .await;

    // bea shares both categories with ana and has a favorite ana never bought.
    let bea = [
        order("o-b1", "bea", at(2, 9), &[("p-cafe", 1), ("p-empanada", 1), ("p-brownie", 1)]),
        order("o-b2", "bea", at(3, 9), &[("p-brownie", 2)]),
    ];
    for placed in &bea {
        harness.engine.on_purchase_completed_at(placed, placed.completed_at).await.expect("bea");
    }
    let ana = order("o-a1", "ana", at(4, 11), &[("p-cafe", 1), ("p-empanada", 1)]);
    harness.engine.on_purchase_completed_at(&ana, ana.completed_at).await.expect("ana");

    let rows = harness.engine.recommendations_for_user(&user("ana")).await.expect("rows");
    let similar = rows
        .iter()
        .find(|row| row.recommendation_type == RecommendationType::SimilarUsers)
        .expect("collaborative row");
    assert_eq!(similar.product_id.0, "p-brownie");

    let brownie = harness
        .profiles
        .find_profile(&user("bea"), &ProductId("p-brownie".to_owned()))
        .await
        .expect("read")
        .expect("bea's favorite");
    assert_eq!(
        similar.predicted_score,
        (brownie.affinity_score * Decimal::new(8, 1))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    );
}

#[tokio::test]
async fn regeneration_is_stable_in_product_ids() {
    let harness = Harness::new();
    let anchor = at(9, 18);
    CampusDemoDataset::stock(&harness.catalog).await.expect("stock");
    CampusDemoDataset::replay(&harness.engine, anchor).await.expect("replay");
    let ana = user("ana");

    let first_at = anchor + Duration::days(8);
    harness.engine.regenerate_at(&ana, first_at).await.expect("first regenerate");
    let first = harness.engine.recommendations_for_user(&ana).await.expect("rows");

    let again = harness.engine.regenerate_at(&ana, first_at).await.expect("repeat");
    assert_eq!(again.purged, 0);
    assert_eq!(again.inserted, 0);

    // Another full retention window later every row is replaced by an equivalent one.
    let second_at = first_at + Duration::days(8);
    let report = harness.engine.regenerate_at(&ana, second_at).await.expect("second regenerate");
    let second = harness.engine.recommendations_for_user(&ana).await.expect("rows");

    assert_eq!(report.purged as usize, first.len());
    assert_eq!(product_ids(&first), product_ids(&second));
    assert!(first.iter().all(|row| second.iter().all(|other| other.id != row.id)));
}

#[tokio::test]
async fn cold_start_fills_an_empty_feed_once() {
    let harness = Harness::new();
    CampusDemoDataset::stock(&harness.catalog).await.expect("stock");
    let newcomer = user("newcomer");
    let now = at(9, 12);

    let feed = harness.engine.get_recommendations_at(&newcomer, 10, now).await;
    assert_eq!(feed.source, FeedSource::ColdStart);
    assert!((1..=8).contains(&feed.items.len()));
    for item in &feed.items {
        assert!(item.predicted_score >= Decimal::new(650, 2));
        assert!(item.predicted_score <= Decimal::new(850, 2));
        assert_eq!(item.recommendation_type, RecommendationType::PreferredCategory);
        let stocked = harness
            .catalog
            .list_available()
            .await
            .expect("catalog")
            .into_iter()
            .any(|product| product.id == item.product_id);
        assert!(stocked, "cold start offered unavailable {}", item.product_id);
    }

    let again = harness.engine.get_recommendations_at(&newcomer, 10, now).await;
    assert_eq!(again.source, FeedSource::Stored);
    assert_eq!(product_ids(&again.items), product_ids(&feed.items));
}

#[tokio::test]
async fn cold_start_with_a_single_available_product_yields_one_row() {
    let harness = Harness::new();
    harness.stock(vec![product("p-only", "snacks", true), product("p-off", "snacks", false)]).await;

    let feed = harness.engine.get_recommendations_at(&user("u-1"), 5, at(9, 12)).await;

    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].product_id.0, "p-only");
}

#[tokio::test]
async fn empty_catalog_gives_an_empty_stored_feed() {
    let harness = Harness::new();

    let feed = harness.engine.get_recommendations_at(&user("u-1"), 5, at(9, 12)).await;

    assert!(feed.items.is_empty());
    assert_eq!(feed.source, FeedSource::Stored);
    assert!(harness.engine.get_recommendations_at(&user("u-1"), 0, at(9, 12)).await.items.is_empty());
}

#[tokio::test]
async fn feedback_is_recorded_per_row() {
    let harness = Harness::new();
    CampusDemoDataset::stock(&harness.catalog).await.expect("stock");
    let u = user("u-1");
    let feed = harness.engine.get_recommendations_at(&u, 3, at(9, 12)).await;
    let id = feed.items[0].id.clone();

    assert!(harness.engine.mark_shown_at(&id, at(9, 13)).await.expect("shown"));
    assert!(harness.engine.mark_shown_at(&id, at(9, 15)).await.expect("shown"));
    assert!(harness.engine.mark_accepted_at(&id, at(9, 16)).await.expect("accepted"));

    let stored = harness.recommendations.find_by_id(&id).await.expect("read").expect("row");
    assert_eq!(stored.times_shown, 2);
    assert_eq!(stored.shown_at, Some(at(9, 15)));
    assert!(stored.was_accepted);
    assert_eq!(stored.accepted_at, Some(at(9, 16)));

    let unknown = RecommendationId("missing".to_owned());
    assert!(!harness.engine.mark_shown_at(&unknown, at(9, 17)).await.expect("no-op"));
    assert!(!harness.engine.mark_accepted_at(&unknown, at(9, 17)).await.expect("no-op"));

    let stats = harness.engine.effectiveness_stats(&u).await.expect("stats");
    let preferred = stats
        .iter()
        .find(|entry| entry.recommendation_type == RecommendationType::PreferredCategory)
        .expect("cold start type");
    assert_eq!(preferred.shown, 1);
    assert_eq!(preferred.accepted, 1);
    assert_eq!(preferred.conversion_rate, Decimal::new(10000, 2));
}

#[tokio::test]
async fn unknown_product_rejects_the_whole_order() {
    let harness = Harness::new();
    harness.stock(vec![product("p1", "bebidas", true)]).await;

    let placed = order("o-1", "u-1", at(2, 10), &[("p1", 1), ("p-ghost", 1)]);
    let error = harness
        .engine
        .on_purchase_completed_at(&placed, at(2, 10))
        .await
        .expect_err("missing product");

    assert!(matches!(error, ApplicationError::NotFound(_)));
    assert_eq!(harness.profiles.count_profiles().await.expect("count"), 0);
}

#[tokio::test]
async fn overflowing_line_amount_is_rejected_before_any_profile_is_written() {
    let harness = Harness::new();
    harness.stock(vec![product("p1", "bebidas", true)]).await;

    let mut placed = order("o-1", "u-1", at(2, 10), &[("p1", 2)]);
    placed.lines[0].unit_price = Decimal::MAX;
    let error = harness
        .engine
        .on_purchase_completed_at(&placed, at(2, 10))
        .await
        .expect_err("line amount out of range");

    assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidOrder(_))));
    assert_eq!(harness.profiles.count_profiles().await.expect("count"), 0);
}

#[tokio::test]
async fn product_proposed_by_two_strategies_is_stored_once_for_the_first() {
    let harness = Harness::new();
    harness.stock(vec![product("p1", "bebidas", true)]).await;

    // Regenerations triggered by the purchases run at 15:00, so nothing is stored for p1 yet.
    for id in ["o-1", "o-2"] {
        let placed = order(id, "u-1", at(2, 14), &[("p1", 1)]);
        harness.engine.on_purchase_completed_at(&placed, at(2, 15)).await.expect("purchase");
    }
    assert!(harness.recommendations.list_for_user(&user("u-1")).await.expect("list").is_empty());

    let report = harness.engine.regenerate_at(&user("u-1"), at(5, 14)).await.expect("regenerate");

    let rows = harness.recommendations.list_for_user(&user("u-1")).await.expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].product_id.0, "p1");
    assert_eq!(rows[0].recommendation_type, RecommendationType::FavoriteRepurchase);

    let counts_of = |kind: StrategyKind| {
        report
            .strategies
            .iter()
            .find(|entry| entry.strategy == kind)
            .map(|entry| (entry.proposed, entry.accepted))
    };
    assert_eq!(counts_of(StrategyKind::Repurchase), Some((1, 1)));
    assert_eq!(counts_of(StrategyKind::Temporal), Some((1, 0)));
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn reorder_puts_purchased_then_preferred_category_first() {
    let harness = Harness::new();
    let a = product("A", "bebidas", true);
    let b = product("B", "snacks", true);
    let c = product("C", "postres", true);
    harness.stock(vec![a.clone(), b.clone(), c.clone(), product("X", "snacks", true)]).await;

    let placed = order("o-1", "u-1", at(2, 10), &[("A", 1), ("X", 1)]);
    harness.engine.on_purchase_completed_at(&placed, at(2, 10)).await.expect("purchase");

    let ordered = harness.engine.reorder_by_affinity(vec![c, b, a], &user("u-1")).await;
    let ids = ordered.iter().map(|item| item.id.0.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

/// Delegates to an in-memory store but refuses similarity lookups.
struct NoSimilarityStore {
    inner: InMemoryBehaviorProfileStore,
}

#[async_trait]
impl BehaviorProfileStore for NoSimilarityStore {
    async fn find_profile(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<BehaviorProfile>, StoreError> {
        self.inner.find_profile(user_id, product_id).await
    }

    async fn save_profile(&self, profile: BehaviorProfile) -> Result<(), StoreError> {
        self.inner.save_profile(profile).await
    }

    async fn find_profiles_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        self.inner.find_profiles_by_user(user_id).await
    }

    async fn find_favorites_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        self.inner.find_favorites_by_user(user_id).await
    }

    async fn find_by_user_and_category(
        &self,
        user_id: &UserId,
        category: &Category,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        self.inner.find_by_user_and_category(user_id, category).await
    }

    async fn find_by_user_and_hour(
        &self,
        user_id: &UserId,
        hour: u8,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        self.inner.find_by_user_and_hour(user_id, hour).await
    }

    async fn find_similar_users(
        &self,
        _user_id: &UserId,
        _min_matches: u32,
    ) -> Result<Vec<SimilarUser>, StoreError> {
        Err(StoreError::Unavailable("similarity index offline".to_owned()))
    }

    async fn count_profiles(&self) -> Result<u64, StoreError> {
        self.inner.count_profiles().await
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        self.inner.count_users().await
    }
}

#[tokio::test]
async fn failing_strategy_does_not_block_the_others() {
    let profiles = Arc::new(NoSimilarityStore { inner: InMemoryBehaviorProfileStore::default() });
    let recommendations = Arc::new(InMemoryRecommendationStore::default());
    let catalog = Arc::new(InMemoryProductCatalog::default());
    catalog.save(product("p1", "bebidas", true)).await;
    catalog.save(product("p2", "bebidas", true)).await;
    let engine = RecommendationEngine::new(
        profiles,
        recommendations.clone(),
        catalog,
        RecommendationsConfig::default(),
    );

    let placed = order("o-1", "u-1", at(2, 14), &[("p1", 1)]);
    let outcome = engine.on_purchase_completed_at(&placed, at(2, 14)).await.expect("purchase");
    let report = outcome.regeneration.expect("regeneration ran");

    let status_of = |kind: StrategyKind| {
        report.strategies.iter().find(|entry| entry.strategy == kind).map(|entry| entry.status)
    };
    assert_eq!(status_of(StrategyKind::Collaborative), Some(StrategyStatus::Failed));
    assert_eq!(status_of(StrategyKind::ContentBased), Some(StrategyStatus::Succeeded));
    assert_eq!(status_of(StrategyKind::Temporal), Some(StrategyStatus::Succeeded));
    assert_eq!(report.inserted, 2);
    assert_eq!(recommendations.count().await.expect("count"), 2);
}

/// Recommendation store whose reads always fail.
struct UnreadableRecommendations;

#[async_trait]
impl RecommendationStore for UnreadableRecommendations {
    async fn exists(&self, _user_id: &UserId, _product_id: &ProductId) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn save_all(&self, _recommendations: Vec<Recommendation>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn save(&self, _recommendation: Recommendation) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn find_by_id(
        &self,
        _id: &RecommendationId,
    ) -> Result<Option<Recommendation>, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn top_for_user(
        &self,
        _user_id: &UserId,
        _limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn list_for_user(&self, _user_id: &UserId) -> Result<Vec<Recommendation>, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn delete_generated_before(
        &self,
        _user_id: &UserId,
        _cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("disk gone".to_owned()))
    }
}

#[tokio::test]
async fn unreadable_store_degrades_reads_but_keeps_purchases() {
    let profiles = Arc::new(InMemoryBehaviorProfileStore::default());
    let catalog = Arc::new(InMemoryProductCatalog::default());
    catalog.save(product("p1", "bebidas", true)).await;
    let engine = RecommendationEngine::new(
        profiles.clone(),
        Arc::new(UnreadableRecommendations),
        catalog,
        RecommendationsConfig::default(),
    );

    let feed = engine.get_recommendations_at(&user("u-1"), 5, at(2, 12)).await;
    assert!(feed.items.is_empty());
    assert_eq!(feed.source, FeedSource::Unavailable);

    let placed = order("o-1", "u-1", at(2, 14), &[("p1", 1)]);
    let outcome = engine.on_purchase_completed_at(&placed, at(2, 14)).await.expect("purchase");
    assert!(outcome.regeneration.is_none());
    assert_eq!(profiles.count_profiles().await.expect("count"), 1);

    let reordered = engine.reorder_by_affinity(vec![product("p9", "snacks", true)], &user("u-1")).await;
    assert_eq!(reordered.len(), 1);
}

#[tokio::test]
async fn sqlite_backed_engine_serves_the_demo_dataset() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    CampusDemoDataset::load(&pool).await.expect("seed catalog");

    let engine = RecommendationEngine::new(
        Arc::new(SqlBehaviorProfileRepository::new(pool.clone())),
        Arc::new(SqlRecommendationRepository::new(pool.clone())),
        Arc::new(SqlProductRepository::new(pool.clone())),
        RecommendationsConfig::default(),
    );

    let anchor = at(9, 18);
    let replayed = CampusDemoDataset::replay(&engine, anchor).await.expect("replay");
    assert_eq!(replayed.orders_replayed, 11);
    assert!(CampusDemoDataset::has_history(&pool).await.expect("history"));

    let feed = engine.get_recommendations_at(&user("ana"), 10, anchor).await;
    assert_eq!(feed.source, FeedSource::Stored);
    assert!(!feed.items.is_empty());
    assert!(feed.items.windows(2).all(|pair| pair[0].predicted_score >= pair[1].predicted_score));

    let insights = engine.user_insights(&user("ana")).await.expect("insights");
    assert_eq!(insights.total_purchases, 7);
    assert_eq!(insights.top_categories[0].category.as_str(), "bebidas");

    let preferred = engine.preferred_categories(&user("ana")).await.expect("preferred");
    assert_eq!(preferred.first().map(Category::as_str), Some("bebidas"));

    let status = engine.status().await.expect("status");
    assert_eq!(status.users, 4);
    assert!(status.recommendations > 0);
}
