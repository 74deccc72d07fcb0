use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tastebud_db::{migrations, ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let schema = if database.status == "ready" {
        schema_check(&state.db_pool).await
    } else {
        HealthCheck { status: "skipped", detail: "database unreachable".to_string() }
    };
    let ready = database.status == "ready" && schema.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "tastebud-server runtime initialized".to_string(),
        },
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Ready only when every migration shipped with this build has been applied.
async fn schema_check(pool: &DbPool) -> HealthCheck {
    let known = migrations::known_versions();
    match migrations::applied_versions(pool).await {
        Ok(applied) if known.iter().all(|version| applied.contains(version)) => {
            HealthCheck { status: "ready", detail: format!("schema at version {}", applied.len()) }
        }
        Ok(applied) => HealthCheck {
            status: "degraded",
            detail: format!("{} of {} migrations applied", applied.len(), known.len()),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("migration history unreadable: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use tastebud_db::{connect_with_settings, migrations, DbPool};
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = migrated_pool().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.schema.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_before_migrations_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.schema.status, "degraded");
        assert_eq!(payload.schema.detail, "0 of 2 migrations applied");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert!(payload.database.detail.starts_with("database query failed"));
        assert_eq!(payload.schema.status, "skipped");
    }

    #[tokio::test]
    async fn health_route_is_mounted() {
        let pool = migrated_pool().await;

        let response = router(pool.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        pool.close().await;
    }
}
