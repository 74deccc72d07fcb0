//! JSON API over the recommendation engine.
//!
//! Endpoints (all under `/api/v1`):
//! - `POST /orders/completed`                     ingest a completed order
//! - `GET  /recommendations/{user_id}?limit=`     ranked feed, cold start on first visit
//! - `POST /recommendations/{user_id}/regenerate` rebuild the user's stored set
//! - `POST /recommendations/item/{id}/shown`      impression feedback
//! - `POST /recommendations/item/{id}/accepted`   conversion feedback
//! - `GET  /users/{user_id}/profiles`             behavior profiles, highest affinity first
//! - `GET  /users/{user_id}/preferred-categories` categories bought repeatedly
//! - `POST /users/{user_id}/reorder`              sort a product list by affinity
//! - `GET  /users/{user_id}/insights`             purchase summary
//! - `GET  /users/{user_id}/effectiveness`        conversion by recommendation type
//! - `GET  /status`                               row counts

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tastebud_core::domain::behavior::BehaviorProfile;
use tastebud_core::domain::order::{CompletedOrder, OrderId, OrderLine};
use tastebud_core::domain::product::{Category, Product};
use tastebud_core::domain::recommendation::{Recommendation, RecommendationId};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::{ApplicationError, InterfaceError};
use tastebud_core::recommendations::{
    FeedSource, PurchaseOutcome, RecommendationEngine, RegenerationReport, SystemStatus,
    TypeEffectiveness, UserInsights,
};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<RecommendationEngine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
pub struct CompletedOrderRequest {
    pub order_id: String,
    pub user_id: String,
    /// Defaults to the time the request is received.
    pub completed_at: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub description: String,
    /// 100 once the item was shown and accepted, otherwise 0.
    pub effectiveness_rate: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedResponse {
    pub user_id: UserId,
    pub source: FeedSource,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackResponse {
    pub recommendation_id: String,
    pub updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub products: Vec<Product>,
}

#[derive(Debug, Serialize)]
pub struct ReorderResponse {
    pub user_id: UserId,
    pub products: Vec<Product>,
}

#[derive(Debug, Serialize)]
pub struct PreferredCategoriesResponse {
    pub user_id: UserId,
    pub categories: Vec<Category>,
}

pub fn router(engine: Arc<RecommendationEngine>) -> Router {
    Router::new()
        .route("/api/v1/orders/completed", post(complete_order))
        .route("/api/v1/recommendations/{user_id}", get(get_feed))
        .route("/api/v1/recommendations/{user_id}/regenerate", post(regenerate))
        .route("/api/v1/recommendations/item/{id}/shown", post(mark_shown))
        .route("/api/v1/recommendations/item/{id}/accepted", post(mark_accepted))
        .route("/api/v1/users/{user_id}/profiles", get(list_profiles))
        .route("/api/v1/users/{user_id}/preferred-categories", get(preferred_categories))
        .route("/api/v1/users/{user_id}/reorder", post(reorder))
        .route("/api/v1/users/{user_id}/insights", get(insights))
        .route("/api/v1/users/{user_id}/effectiveness", get(effectiveness))
        .route("/api/v1/status", get(status))
        .with_state(ApiState { engine })
}

pub async fn complete_order(
    State(state): State<ApiState>,
    Json(request): Json<CompletedOrderRequest>,
) -> ApiResult<PurchaseOutcome> {
    let order = CompletedOrder {
        order_id: OrderId(request.order_id),
        user_id: UserId(request.user_id),
        completed_at: request.completed_at.unwrap_or_else(Utc::now),
        lines: request.lines,
    };

    let outcome =
        state.engine.on_purchase_completed(&order).await.map_err(|e| api_error(e, "orders.complete"))?;

    info!(
        event_name = "api.orders.completed",
        order_id = %order.order_id.0,
        user_id = %order.user_id,
        regenerated = outcome.regeneration.is_some(),
        "completed order ingested"
    );
    Ok(Json(outcome))
}

pub async fn get_feed(
    Path(user_id): Path<String>,
    Query(query): Query<FeedQuery>,
    State(state): State<ApiState>,
) -> Json<FeedResponse> {
    let user_id = UserId(user_id);
    let limit = query.limit.unwrap_or(state.engine.settings().default_limit);
    let feed = state.engine.get_recommendations(&user_id, limit).await;

    if feed.source == FeedSource::Unavailable {
        warn!(
            event_name = "api.recommendations.degraded",
            user_id = %user_id,
            "serving empty feed"
        );
    }

    let items = feed
        .items
        .into_iter()
        .map(|recommendation| FeedItem {
            description: recommendation.recommendation_type.description().to_owned(),
            effectiveness_rate: recommendation.effectiveness_rate(),
            recommendation,
        })
        .collect();
    Json(FeedResponse { user_id, source: feed.source, items })
}

pub async fn regenerate(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<RegenerationReport> {
    let report = state
        .engine
        .regenerate(&UserId(user_id))
        .await
        .map_err(|e| api_error(e, "recommendations.regenerate"))?;
    Ok(Json(report))
}

pub async fn mark_shown(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<FeedbackResponse> {
    let updated = state
        .engine
        .mark_shown(&RecommendationId(id.clone()))
        .await
        .map_err(|e| api_error(e, "recommendations.shown"))?;
    Ok(Json(FeedbackResponse { recommendation_id: id, updated }))
}

pub async fn mark_accepted(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<FeedbackResponse> {
    let updated = state
        .engine
        .mark_accepted(&RecommendationId(id.clone()))
        .await
        .map_err(|e| api_error(e, "recommendations.accepted"))?;
    Ok(Json(FeedbackResponse { recommendation_id: id, updated }))
}

pub async fn list_profiles(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<BehaviorProfile>> {
    let profiles = state
        .engine
        .profiles_for_user(&UserId(user_id))
        .await
        .map_err(|e| api_error(e, "users.profiles"))?;
    Ok(Json(profiles))
}

pub async fn preferred_categories(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<PreferredCategoriesResponse> {
    let user_id = UserId(user_id);
    let categories = state
        .engine
        .preferred_categories(&user_id)
        .await
        .map_err(|e| api_error(e, "users.preferred_categories"))?;
    Ok(Json(PreferredCategoriesResponse { user_id, categories }))
}

pub async fn reorder(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<ReorderRequest>,
) -> Json<ReorderResponse> {
    let user_id = UserId(user_id);
    let products = state.engine.reorder_by_affinity(request.products, &user_id).await;
    Json(ReorderResponse { user_id, products })
}

pub async fn insights(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<UserInsights> {
    let insights = state
        .engine
        .user_insights(&UserId(user_id))
        .await
        .map_err(|e| api_error(e, "users.insights"))?;
    Ok(Json(insights))
}

pub async fn effectiveness(
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<TypeEffectiveness>> {
    let stats = state
        .engine
        .effectiveness_stats(&UserId(user_id))
        .await
        .map_err(|e| api_error(e, "users.effectiveness"))?;
    Ok(Json(stats))
}

pub async fn status(State(state): State<ApiState>) -> ApiResult<SystemStatus> {
    let status = state.engine.status().await.map_err(|e| api_error(e, "status"))?;
    Ok(Json(status))
}

fn api_error(error: ApplicationError, operation: &'static str) -> (StatusCode, Json<ApiError>) {
    let correlation_id = Uuid::new_v4().to_string();
    error!(
        event_name = "api.request.failed",
        correlation_id = %correlation_id,
        operation,
        error = %error,
        "request failed"
    );

    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: interface.user_message().to_owned(),
            correlation_id: interface.correlation_id().to_owned(),
        }),
    )
}
