use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions shipped with this build, oldest first.
pub fn known_versions() -> Vec<i64> {
    MIGRATOR
        .iter()
        .filter(|migration| migration.migration_type.is_up_migration())
        .map(|migration| migration.version)
        .collect()
}

/// Versions of migrations already recorded in the database, oldest first.
pub async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let table_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if table_count == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, known_versions, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "product",
        "behavior_profile",
        "recommendation",
        "idx_product_category_available",
        "idx_behavior_profile_user_affinity",
        "idx_behavior_profile_user_category",
        "idx_behavior_profile_user_hour",
        "idx_behavior_profile_product",
        "idx_behavior_profile_category",
        "idx_recommendation_user_score",
        "idx_recommendation_user_generated",
        "idx_recommendation_user_product",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        assert_eq!(table_count(&pool, "product").await, 1);
        assert_eq!(table_count(&pool, "behavior_profile").await, 1);
        assert_eq!(table_count(&pool, "recommendation").await, 1);
        assert_eq!(applied_versions(&pool).await.expect("versions"), vec![1, 2]);
        assert_eq!(known_versions(), vec![1, 2]);
    }

    #[tokio::test]
    async fn fresh_database_reports_no_applied_versions() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.expect("versions").is_empty());
    }

    #[tokio::test]
    async fn behavior_profile_is_unique_per_user_and_product() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO behavior_profile (
                user_id, product_id, product_name, category, store_id, store_name,
                purchase_count, total_spent, average_quantity, is_favorite, affinity_score,
                affinity_rank, preferred_hour, last_purchase_at, created_at, updated_at
            ) VALUES ('u-1', 'p-1', 'Cafe', 'bebidas', 's-1', 'Kiosko', 1, '2.50', '1', 0,
                '40.00', 40.0, 9, '2026-03-02T09:00:00.000000Z',
                '2026-03-02T09:00:00.000000Z', '2026-03-02T09:00:00.000000Z')";

        sqlx::query(insert).execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert).execute(&pool).await;

        assert!(duplicate.is_err(), "second profile for the same pair must be rejected");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "recommendation").await, 0);
        assert_eq!(table_count(&pool, "behavior_profile").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
