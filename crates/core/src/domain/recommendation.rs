use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::product::{Category, Product, ProductId, StoreId};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecommendationId(pub String);

impl RecommendationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecommendationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    FavoriteRepurchase,
    PreferredCategory,
    SimilarUsers,
    Complementary,
    TemporalTrend,
    NewInFavoriteStore,
    SimilarPrice,
    FavoriteStore,
    HabitualHour,
}

impl RecommendationType {
    pub const ALL: [RecommendationType; 9] = [
        Self::FavoriteRepurchase,
        Self::PreferredCategory,
        Self::SimilarUsers,
        Self::Complementary,
        Self::TemporalTrend,
        Self::NewInFavoriteStore,
        Self::SimilarPrice,
        Self::FavoriteStore,
        Self::HabitualHour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FavoriteRepurchase => "favorite_repurchase",
            Self::PreferredCategory => "preferred_category",
            Self::SimilarUsers => "similar_users",
            Self::Complementary => "complementary",
            Self::TemporalTrend => "temporal_trend",
            Self::NewInFavoriteStore => "new_in_favorite_store",
            Self::SimilarPrice => "similar_price",
            Self::FavoriteStore => "favorite_store",
            Self::HabitualHour => "habitual_hour",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "favorite_repurchase" => Some(Self::FavoriteRepurchase),
            "preferred_category" => Some(Self::PreferredCategory),
            "similar_users" => Some(Self::SimilarUsers),
            "complementary" => Some(Self::Complementary),
            "temporal_trend" => Some(Self::TemporalTrend),
            "new_in_favorite_store" => Some(Self::NewInFavoriteStore),
            "similar_price" => Some(Self::SimilarPrice),
            "favorite_store" => Some(Self::FavoriteStore),
            "habitual_hour" => Some(Self::HabitualHour),
            _ => None,
        }
    }

    /// Short human-readable explanation shown next to the item.
    pub fn description(&self) -> &'static str {
        match self {
            Self::FavoriteRepurchase => "One of your favorites, time to order again",
            Self::PreferredCategory => "From a category you enjoy",
            Self::SimilarUsers => "Popular with people who order like you",
            Self::Complementary => "Goes well with what you usually order",
            Self::TemporalTrend => "What you usually order at this hour",
            Self::NewInFavoriteStore => "New at one of your favorite stores",
            Self::SimilarPrice => "In your usual price range",
            Self::FavoriteStore => "From a store you order from often",
            Self::HabitualHour => "Fits your usual ordering time",
        }
    }
}

/// A persisted, user-facing recommendation row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub predicted_score: Decimal,
    pub recommendation_type: RecommendationType,
    pub product_name: String,
    pub category: Category,
    pub price: Decimal,
    pub image_ref: Option<String>,
    pub store_id: StoreId,
    pub store_name: String,
    pub times_shown: u32,
    pub was_accepted: bool,
    pub shown_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn new(
        user_id: UserId,
        product: &Product,
        predicted_score: Decimal,
        recommendation_type: RecommendationType,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecommendationId::generate(),
            user_id,
            product_id: product.id.clone(),
            predicted_score,
            recommendation_type,
            product_name: product.name.clone(),
            category: product.category.clone(),
            price: product.price,
            image_ref: product.image_ref.clone(),
            store_id: product.store_id.clone(),
            store_name: product.store_name.clone(),
            times_shown: 0,
            was_accepted: false,
            shown_at: None,
            accepted_at: None,
            generated_at,
        }
    }

    pub fn mark_shown(&mut self, at: DateTime<Utc>) {
        self.times_shown = self.times_shown.saturating_add(1);
        self.shown_at = Some(at);
    }

    pub fn mark_accepted(&mut self, at: DateTime<Utc>) {
        self.was_accepted = true;
        self.accepted_at = Some(at);
    }

    /// 100 when the row was shown and accepted, otherwise 0.
    pub fn effectiveness_rate(&self) -> Decimal {
        if self.times_shown > 0 && self.was_accepted {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{Recommendation, RecommendationType};
    use crate::domain::product::{Category, Product, ProductId, StoreId};
    use crate::domain::user::UserId;

    fn recommendation() -> Recommendation {
        let product = Product {
            id: ProductId("p-1".to_owned()),
            name: "Empanada".to_owned(),
            price: Decimal::new(3000, 2),
            image_ref: Some("img/empanada.png".to_owned()),
            category: Category::parse("snacks").expect("valid"),
            store_id: StoreId("s-1".to_owned()),
            store_name: "Kiosko".to_owned(),
            available: true,
        };
        Recommendation::new(
            UserId("u-1".to_owned()),
            &product,
            Decimal::new(60, 0),
            RecommendationType::PreferredCategory,
            Utc::now(),
        )
    }

    #[test]
    fn type_round_trips_through_wire_names() {
        for kind in RecommendationType::ALL {
            assert_eq!(RecommendationType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecommendationType::parse("unknown"), None);
    }

    #[test]
    fn mark_shown_twice_counts_both_and_keeps_latest_timestamp() {
        let mut rec = recommendation();
        let first = Utc::now();
        let second = first + Duration::minutes(5);

        rec.mark_shown(first);
        rec.mark_shown(second);

        assert_eq!(rec.times_shown, 2);
        assert_eq!(rec.shown_at, Some(second));
    }

    #[test]
    fn effectiveness_is_binary_per_row() {
        let mut rec = recommendation();
        assert_eq!(rec.effectiveness_rate(), Decimal::ZERO);

        rec.mark_accepted(Utc::now());
        assert_eq!(rec.effectiveness_rate(), Decimal::ZERO, "never shown");

        rec.mark_shown(Utc::now());
        assert_eq!(rec.effectiveness_rate(), Decimal::ONE_HUNDRED);
    }
}
