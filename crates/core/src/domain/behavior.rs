//! Per-(user, product) purchase statistics and the affinity model built on them.

use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::product::{Category, Product, ProductId, StoreId};
use crate::domain::user::UserId;

const FREQUENCY_WEIGHT: Decimal = Decimal::from_parts(4, 0, 0, false, 1);
const SPEND_WEIGHT: Decimal = Decimal::from_parts(3, 0, 0, false, 1);
const RECENCY_WEIGHT: Decimal = Decimal::from_parts(2, 0, 0, false, 1);
const QUANTITY_WEIGHT: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

const FREQUENCY_PER_PURCHASE: Decimal = Decimal::from_parts(20, 0, 0, false, 0);
const SPEND_FACTOR: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const RECENCY_DECAY_PER_DAY: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
const QUANTITY_FACTOR: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Purchase count at which a product becomes a favorite.
pub const FAVORITE_THRESHOLD: u32 = 2;

/// One resolved line of a completed order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseEvent {
    pub user_id: UserId,
    pub product: Product,
    pub quantity: u32,
    pub line_amount: Decimal,
    pub purchased_at: DateTime<Utc>,
    /// Hour of the purchase on the marketplace's wall clock.
    pub local_hour: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_name: String,
    pub category: Category,
    pub store_id: StoreId,
    pub store_name: String,
    pub purchase_count: u32,
    pub total_spent: Decimal,
    pub average_quantity: Option<Decimal>,
    pub is_favorite: bool,
    pub affinity_score: Decimal,
    pub preferred_hour: u8,
    pub last_purchase_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BehaviorProfile {
    pub fn days_since_last_purchase(&self, now: DateTime<Utc>) -> i64 {
        whole_days_between(self.last_purchase_at, now)
    }
}

/// Folds one purchase into the previous profile, or starts a new one.
///
/// A missing profile starts from zero counters, so the first purchase
/// yields `purchase_count == 1`.
pub fn apply_purchase(
    previous: Option<&BehaviorProfile>,
    event: &PurchaseEvent,
    now: DateTime<Utc>,
) -> BehaviorProfile {
    let (previous_count, previous_spent, previous_average, created_at) = match previous {
        Some(profile) => (
            profile.purchase_count,
            profile.total_spent,
            profile.average_quantity,
            profile.created_at,
        ),
        None => (0, Decimal::ZERO, None, now),
    };

    let purchase_count = previous_count.saturating_add(1);
    let total_spent = previous_spent.saturating_add(event.line_amount);
    let quantity = Decimal::from(event.quantity);
    let average_quantity = match previous_average {
        None => quantity,
        Some(average) => round_half_up(
            (average * Decimal::from(purchase_count - 1) + quantity) / Decimal::from(purchase_count),
        ),
    };

    let days_since = whole_days_between(event.purchased_at, now);
    let affinity = affinity_score(purchase_count, total_spent, Some(average_quantity), days_since);

    BehaviorProfile {
        user_id: event.user_id.clone(),
        product_id: event.product.id.clone(),
        product_name: event.product.name.clone(),
        category: event.product.category.clone(),
        store_id: event.product.store_id.clone(),
        store_name: event.product.store_name.clone(),
        purchase_count,
        total_spent,
        average_quantity: Some(average_quantity),
        is_favorite: purchase_count >= FAVORITE_THRESHOLD,
        affinity_score: affinity,
        preferred_hour: event.local_hour,
        last_purchase_at: event.purchased_at,
        created_at,
        updated_at: now,
    }
}

/// Weighted 0-100 composite of frequency, spend, recency and quantity.
///
/// The spend sub-score is not capped before weighting; the total is.
pub fn affinity_score(
    purchase_count: u32,
    total_spent: Decimal,
    average_quantity: Option<Decimal>,
    days_since_last_purchase: i64,
) -> Decimal {
    let frequency = clamp_percent(Decimal::from(purchase_count) * FREQUENCY_PER_PURCHASE);
    let spend = (total_spent * SPEND_FACTOR).max(Decimal::ZERO);
    let recency = clamp_percent(
        Decimal::ONE_HUNDRED - Decimal::from(days_since_last_purchase.max(0)) * RECENCY_DECAY_PER_DAY,
    );
    let quantity = clamp_percent(average_quantity.unwrap_or(Decimal::ZERO) * QUANTITY_FACTOR);

    let weighted = frequency * FREQUENCY_WEIGHT
        + spend * SPEND_WEIGHT
        + recency * RECENCY_WEIGHT
        + quantity * QUANTITY_WEIGHT;

    round_half_up(clamp_percent(weighted))
}

/// Whole days elapsed from `from` to `to`, truncated and never negative.
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}

/// Hour of day for `at` shifted by the marketplace's UTC offset.
pub fn local_hour(at: DateTime<Utc>, utc_offset_minutes: i32) -> u8 {
    let shifted = at + Duration::minutes(i64::from(utc_offset_minutes));
    shifted.hour() as u8
}

pub(crate) fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn clamp_percent(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{affinity_score, apply_purchase, local_hour, PurchaseEvent};
    use crate::domain::product::{Category, Product, ProductId, StoreId};
    use crate::domain::user::UserId;

    fn product() -> Product {
        Product {
            id: ProductId("p-cafe".to_owned()),
            name: "Cafe americano".to_owned(),
            price: Decimal::new(2500, 2),
            image_ref: None,
            category: Category::parse("bebidas").expect("valid category"),
            store_id: StoreId("s-1".to_owned()),
            store_name: "Cafeteria Central".to_owned(),
            available: true,
        }
    }

    fn event(quantity: u32, hour: u32) -> PurchaseEvent {
        let purchased_at = Utc.with_ymd_and_hms(2026, 3, 2, hour, 15, 0).single().expect("valid");
        PurchaseEvent {
            user_id: UserId("u-1".to_owned()),
            product: product(),
            quantity,
            line_amount: Decimal::new(2500, 2) * Decimal::from(quantity),
            purchased_at,
            local_hour: local_hour(purchased_at, 0),
        }
    }

    #[test]
    fn purchase_count_tracks_purchases_and_favorite_flips_at_two() {
        let first = apply_purchase(None, &event(1, 14), event(1, 14).purchased_at);
        assert_eq!(first.purchase_count, 1);
        assert!(!first.is_favorite);

        let second = apply_purchase(Some(&first), &event(1, 14), event(1, 14).purchased_at);
        assert_eq!(second.purchase_count, 2);
        assert!(second.is_favorite);

        let mut profile = second;
        for _ in 0..5 {
            profile = apply_purchase(Some(&profile), &event(1, 14), event(1, 14).purchased_at);
        }
        assert_eq!(profile.purchase_count, 7);
        assert!(profile.is_favorite);
    }

    #[test]
    fn average_quantity_is_running_weighted_mean() {
        let now = event(2, 10).purchased_at;
        let mut profile = apply_purchase(None, &event(2, 10), now);
        profile = apply_purchase(Some(&profile), &event(4, 10), now);
        profile = apply_purchase(Some(&profile), &event(6, 10), now);

        assert_eq!(profile.average_quantity, Some(Decimal::new(400, 2)));
    }

    #[test]
    fn preferred_hour_follows_latest_purchase() {
        let now = event(1, 23).purchased_at;
        let first = apply_purchase(None, &event(1, 8), now);
        let second = apply_purchase(Some(&first), &event(1, 8), now);
        let third = apply_purchase(Some(&second), &event(1, 23), now);

        assert_eq!(first.preferred_hour, 8);
        assert_eq!(third.preferred_hour, 23);
    }

    #[test]
    fn created_at_survives_updates() {
        let first_at = event(1, 9).purchased_at;
        let first = apply_purchase(None, &event(1, 9), first_at);
        let later = first_at + Duration::hours(30);
        let second = apply_purchase(Some(&first), &event(1, 9), later);

        assert_eq!(second.created_at, first_at);
        assert_eq!(second.updated_at, later);
    }

    #[test]
    fn total_spent_saturates_instead_of_overflowing() {
        let now = event(1, 12).purchased_at;
        let mut previous = apply_purchase(None, &event(1, 12), now);
        previous.total_spent = Decimal::MAX;

        let next = apply_purchase(Some(&previous), &event(1, 12), now);

        assert_eq!(next.total_spent, Decimal::MAX);
        assert_eq!(next.affinity_score, Decimal::ONE_HUNDRED);
    }

    #[test]
    fn affinity_is_clamped_for_large_spend() {
        let score = affinity_score(1, Decimal::new(1_000_000, 0), Some(Decimal::ONE), 0);
        assert_eq!(score, Decimal::ONE_HUNDRED);

        let zero = affinity_score(0, Decimal::ZERO, None, 10_000);
        assert_eq!(zero, Decimal::ZERO);
    }

    #[test]
    fn affinity_weights_each_signal() {
        // frequency 40 * 0.4 + spend 25 * 0.3 + recency 100 * 0.2 + quantity 20 * 0.1
        let score = affinity_score(2, Decimal::new(50, 0), Some(Decimal::new(2, 0)), 0);
        assert_eq!(score, Decimal::new(4550, 2));

        // ten days old: recency 80
        let older = affinity_score(2, Decimal::new(50, 0), Some(Decimal::new(2, 0)), 10);
        assert_eq!(older, Decimal::new(4150, 2));
    }

    #[test]
    fn local_hour_applies_offset_and_wraps() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 2, 30, 0).single().expect("valid");
        assert_eq!(local_hour(at, 0), 2);
        assert_eq!(local_hour(at, -300), 21);
        assert_eq!(local_hour(at, 120), 4);
    }
}
