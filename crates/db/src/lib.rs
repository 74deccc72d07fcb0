//! SQLite persistence for the recommendation engine: pool setup, migrations,
//! SQL and in-memory implementations of the store ports, and the demo dataset.

pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use fixtures::{CampusDemoDataset, ReplayResult, SeedResult, VerificationResult};
pub use repositories::{
    InMemoryBehaviorProfileStore, InMemoryProductCatalog, InMemoryRecommendationStore,
    RepositoryError, SqlBehaviorProfileRepository, SqlProductRepository,
    SqlRecommendationRepository,
};
