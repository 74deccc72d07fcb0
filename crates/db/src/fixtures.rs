use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;

use tastebud_core::domain::order::{CompletedOrder, OrderId, OrderLine};
use tastebud_core::domain::product::{Category, Product, ProductId, StoreId};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::{ApplicationError, DomainError};
use tastebud_core::recommendations::RecommendationEngine;

use crate::connection::DbPool;
use crate::repositories::{InMemoryProductCatalog, RepositoryError, SqlProductRepository};

const SEED_PRODUCTS: &[SeedProduct] = &[
    SeedProduct::new("p-cafe-negro", "Cafe negro", 900, "bebidas", CAFETERIA),
    SeedProduct::new("p-capuchino", "Capuchino", 1500, "bebidas", CAFETERIA),
    SeedProduct::new("p-gallo-pinto", "Gallo pinto", 2500, "desayunos", CAFETERIA),
    SeedProduct::new("p-empanada", "Empanada de queso", 1200, "snacks", CAFETERIA),
    SeedProduct::new("p-casado", "Casado con pollo", 3200, "comida", SODA),
    SeedProduct::new("p-arroz-cantones", "Arroz cantones", 2800, "comida", SODA),
    SeedProduct::new("p-fresco-natural", "Fresco natural", 800, "bebidas", SODA),
    SeedProduct::new("p-tres-leches", "Tres leches", 1400, "postres", SODA),
    SeedProduct::new("p-sandwich", "Sandwich de jamon", 1800, "snacks", KIOSKO),
    SeedProduct::new("p-galletas", "Galletas de avena", 600, "snacks", KIOSKO),
    SeedProduct::new("p-te-frio", "Te frio", 700, "bebidas", KIOSKO),
    SeedProduct::new("p-brownie", "Brownie", 1000, "postres", KIOSKO),
    SeedProduct::new("p-batido", "Batido de fresa", 1600, "bebidas", KIOSKO).unavailable(),
    SeedProduct::new("p-lasagna", "Lasagna", 3500, "comida", SODA).unavailable(),
];

/// Purchase history relative to the anchor day.
const SEED_ORDERS: &[SeedOrder] = &[
    SeedOrder::new("o-ana-1", "ana", 6, 8, &[("p-cafe-negro", 1), ("p-gallo-pinto", 1)]),
    SeedOrder::new("o-ana-2", "ana", 4, 8, &[("p-cafe-negro", 2)]),
    SeedOrder::new("o-ana-3", "ana", 4, 13, &[("p-casado", 1), ("p-fresco-natural", 1)]),
    SeedOrder::new("o-ana-4", "ana", 1, 8, &[("p-cafe-negro", 1), ("p-empanada", 2)]),
    SeedOrder::new("o-beto-1", "beto", 5, 8, &[("p-cafe-negro", 1), ("p-empanada", 1)]),
    SeedOrder::new("o-beto-2", "beto", 3, 12, &[("p-arroz-cantones", 1), ("p-te-frio", 1)]),
    SeedOrder::new("o-beto-3", "beto", 2, 15, &[("p-brownie", 1), ("p-capuchino", 1)]),
    SeedOrder::new("o-carla-1", "carla", 6, 16, &[("p-tres-leches", 1), ("p-capuchino", 1)]),
    SeedOrder::new("o-carla-2", "carla", 3, 16, &[("p-tres-leches", 1), ("p-capuchino", 1)]),
    SeedOrder::new("o-carla-3", "carla", 1, 12, &[("p-sandwich", 1), ("p-galletas", 3)]),
    SeedOrder::new("o-diego-1", "diego", 2, 8, &[("p-cafe-negro", 1), ("p-sandwich", 1)]),
];

const SEED_USERS: &[&str] = &["ana", "beto", "carla", "diego"];

const CAFETERIA: (&str, &str) = ("s-cafeteria-central", "Cafeteria Central");
const SODA: (&str, &str) = ("s-soda-pretil", "Soda El Pretil");
const KIOSKO: (&str, &str) = ("s-kiosko-biblioteca", "Kiosko Biblioteca");

/// Deterministic campus marketplace for local runs and end-to-end tests.
///
/// Three stores, five categories, fourteen products (two unavailable) and a
/// short purchase history for four students spread over the last week.
pub struct CampusDemoDataset;

impl CampusDemoDataset {
    pub fn products() -> Result<Vec<Product>, DomainError> {
        SEED_PRODUCTS.iter().map(SeedProduct::to_product).collect()
    }

    pub fn users() -> Vec<UserId> {
        SEED_USERS.iter().map(|user| UserId((*user).to_owned())).collect()
    }

    /// Orders oldest first, timed on the anchor's calendar day minus `days_ago`.
    pub fn orders(anchor: DateTime<Utc>) -> Vec<CompletedOrder> {
        let anchor_day = anchor.date_naive();
        let mut orders = SEED_ORDERS
            .iter()
            .map(|seed| {
                let time = NaiveTime::from_hms_opt(seed.hour, 0, 0).unwrap_or_default();
                let completed_at =
                    (anchor_day - Duration::days(seed.days_ago)).and_time(time).and_utc();
                CompletedOrder {
                    order_id: OrderId(seed.order_id.to_owned()),
                    user_id: UserId(seed.user_id.to_owned()),
                    completed_at,
                    lines: seed
                        .lines
                        .iter()
                        .map(|(product_id, quantity)| OrderLine {
                            product_id: ProductId((*product_id).to_owned()),
                            quantity: *quantity,
                            unit_price: SEED_PRODUCTS
                                .iter()
                                .find(|product| product.id == *product_id)
                                .map(SeedProduct::price)
                                .unwrap_or(Decimal::ZERO),
                        })
                        .collect(),
                }
            })
            .collect::<Vec<_>>();
        orders.sort_by_key(|order| order.completed_at);
        orders
    }

    /// Upserts the catalog. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let products = Self::products().map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let repository = SqlProductRepository::new(pool.clone());
        for product in &products {
            repository.save(product).await?;
        }

        Ok(SeedResult {
            products_seeded: products.len(),
            unavailable: products.iter().filter(|product| !product.available).count(),
        })
    }

    pub async fn stock(catalog: &InMemoryProductCatalog) -> Result<SeedResult, DomainError> {
        let products = Self::products()?;
        let unavailable = products.iter().filter(|product| !product.available).count();
        let products_seeded = products.len();
        for product in products {
            catalog.save(product).await;
        }
        Ok(SeedResult { products_seeded, unavailable })
    }

    /// Feeds the purchase history through the engine, each order at its own completion time.
    ///
    /// Not idempotent: replaying twice doubles every purchase count.
    pub async fn replay(
        engine: &RecommendationEngine,
        anchor: DateTime<Utc>,
    ) -> Result<ReplayResult, ApplicationError> {
        let mut result = ReplayResult::default();
        for order in Self::orders(anchor) {
            let outcome = engine.on_purchase_completed_at(&order, order.completed_at).await?;
            result.orders_replayed += 1;
            result.profile_updates += outcome.profiles.len();
            result.recommendations_generated +=
                outcome.regeneration.map(|report| report.inserted).unwrap_or(0);
        }
        Ok(result)
    }

    /// Whether any seeded user already has a behavior profile.
    pub async fn has_history(pool: &DbPool) -> Result<bool, RepositoryError> {
        let quoted_users = sql_array_from_ids(SEED_USERS);
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM behavior_profile WHERE user_id IN {quoted_users}"
        ))
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let quoted_products = sql_array_from_ids(&product_ids());
        let stored: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM product WHERE id IN {quoted_products}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("catalog-products", stored == SEED_PRODUCTS.len() as i64));

        let expected_unavailable =
            SEED_PRODUCTS.iter().filter(|product| !product.available).count() as i64;
        let unavailable: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM product WHERE id IN {quoted_products} AND available = 0"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("catalog-unavailable", unavailable == expected_unavailable));

        let categories: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT category) FROM product WHERE id IN {quoted_products}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("catalog-categories", categories == 5));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded catalog and everything derived from the seeded users.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_users = sql_array_from_ids(SEED_USERS);
        let quoted_products = sql_array_from_ids(&product_ids());

        sqlx::query(&format!("DELETE FROM recommendation WHERE user_id IN {quoted_users}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM behavior_profile WHERE user_id IN {quoted_users}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM product WHERE id IN {quoted_products}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedProduct {
    id: &'static str,
    name: &'static str,
    price_cents: i64,
    category: &'static str,
    store: (&'static str, &'static str),
    available: bool,
}

impl SeedProduct {
    const fn new(
        id: &'static str,
        name: &'static str,
        price_cents: i64,
        category: &'static str,
        store: (&'static str, &'static str),
    ) -> Self {
        Self { id, name, price_cents, category, store, available: true }
    }

    const fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }

    fn to_product(&self) -> Result<Product, DomainError> {
        Ok(Product {
            id: ProductId(self.id.to_owned()),
            name: self.name.to_owned(),
            price: self.price(),
            image_ref: Some(format!("images/products/{}.jpg", self.id)),
            category: Category::parse(self.category)?,
            store_id: StoreId(self.store.0.to_owned()),
            store_name: self.store.1.to_owned(),
            available: self.available,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedOrder {
    order_id: &'static str,
    user_id: &'static str,
    days_ago: i64,
    hour: u32,
    lines: &'static [(&'static str, u32)],
}

impl SeedOrder {
    const fn new(
        order_id: &'static str,
        user_id: &'static str,
        days_ago: i64,
        hour: u32,
        lines: &'static [(&'static str, u32)],
    ) -> Self {
        Self { order_id, user_id, days_ago, hour, lines }
    }
}

fn product_ids() -> Vec<&'static str> {
    SEED_PRODUCTS.iter().map(|product| product.id).collect()
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub products_seeded: usize,
    pub unavailable: usize,
}

#[derive(Debug, Default)]
pub struct ReplayResult {
    pub orders_replayed: usize,
    pub profile_updates: usize,
    pub recommendations_generated: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
