pub mod config;
pub mod domain;
pub mod errors;
pub mod recommendations;

pub use domain::behavior::{apply_purchase, BehaviorProfile, PurchaseEvent};
pub use domain::order::{CompletedOrder, OrderId, OrderLine};
pub use domain::product::{Category, Product, ProductId, StoreId};
pub use domain::recommendation::{Recommendation, RecommendationId, RecommendationType};
pub use domain::user::UserId;
pub use errors::{ApplicationError, DomainError, InterfaceError, StoreError};
pub use recommendations::{
    FeedSource, RecommendationEngine, RecommendationFeed, RegenerationReport,
};
