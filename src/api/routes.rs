//! REST endpoints for order inspection and remediation.
//!
//! Everything here is a thin wrapper: reads go to the store, actions go
//! through the processor so they inherit the same duplicate protection as
//! the polling path.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::catalog::{CatalogHandle, Resolver};
use crate::error::DatabaseError;
use crate::orders::IncomingOrder;
use crate::processor::OrderProcessor;
use crate::store::{OrderStatus, OrderStore};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn OrderStore>,
    pub processor: Arc<OrderProcessor>,
    pub catalog: Arc<CatalogHandle>,
}

fn json_error(status: StatusCode, message: impl std::fmt::Display) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

fn db_error(e: DatabaseError) -> axum::response::Response {
    match e {
        DatabaseError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, e),
        DatabaseError::InvalidTransition { .. } => json_error(StatusCode::BAD_REQUEST, e),
        _ => {
            error!("Store error serving API request: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    status: Option<String>,
}

/// GET /api/orders?limit&offset&status
async fn list_orders(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let status = match params.status.as_deref() {
        None => None,
        Some("pending") => Some(OrderStatus::Pending),
        Some("sent") => Some(OrderStatus::Sent),
        Some("failed") => Some(OrderStatus::Failed),
        Some("resolved") => Some(OrderStatus::Resolved),
        Some(other) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                format!("unknown status filter: {other}"),
            );
        }
    };

    match state
        .store
        .list_orders(
            params.limit.unwrap_or(50).min(500),
            params.offset.unwrap_or(0),
            status,
        )
        .await
    {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => db_error(e),
    }
}

/// GET /api/orders/{key}
async fn get_order(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.store.get_order(&key).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, format!("order not found: {key}")),
        Err(e) => db_error(e),
    }
}

/// GET /api/orders/{key}/history
async fn get_history(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.store.history(&key).await {
        Ok(entries) if entries.is_empty() => {
            json_error(StatusCode::NOT_FOUND, format!("no history for: {key}"))
        }
        Ok(entries) => Json(entries).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Deserialize)]
struct LimitParam {
    limit: Option<usize>,
}

/// GET /api/orders/failed/list?limit
async fn list_failed(
    State(state): State<ApiState>,
    Query(params): Query<LimitParam>,
) -> impl IntoResponse {
    match state
        .store
        .list_failed(params.limit.unwrap_or(50).min(500))
        .await
    {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => db_error(e),
    }
}

/// POST /api/orders/{key}/resend
///
/// Re-runs the order through the processor. A sent order comes back as a
/// duplicate outcome, never a second email.
async fn resend_order(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    info!(order_key = %key, "Resend requested via API");
    match state.processor.resend(&key).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(crate::error::Error::Database(e)) => db_error(e),
        Err(e) => json_error(StatusCode::BAD_REQUEST, e),
    }
}

#[derive(Deserialize)]
struct ResolveRequest {
    note: String,
}

/// POST /api/orders/{key}/mark-resolved
async fn mark_resolved(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> impl IntoResponse {
    match state.store.mark_resolved(&key, &body.note).await {
        Ok(()) => Json(serde_json::json!({ "status": "resolved" })).into_response(),
        Err(e) => db_error(e),
    }
}

/// POST /api/orders/submit
///
/// Direct submission, bypassing the poller. Same processing path.
async fn submit_order(
    State(state): State<ApiState>,
    Json(incoming): Json<IncomingOrder>,
) -> impl IntoResponse {
    match state
        .processor
        .submit_order(incoming.vendor, &incoming.order)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(crate::error::Error::Database(e)) => db_error(e),
        Err(e) => json_error(StatusCode::BAD_REQUEST, e),
    }
}

#[derive(Deserialize)]
struct StatsParams {
    days: Option<u32>,
}

/// GET /api/stats?days
async fn get_stats(
    State(state): State<ApiState>,
    Query(params): Query<StatsParams>,
) -> impl IntoResponse {
    match state.store.statistics(params.days.unwrap_or(30)).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => db_error(e),
    }
}

/// DELETE /api/orders/{key}
///
/// Administrative override; the audit log keeps the order's history.
async fn delete_order(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_order(&key).await {
        Ok(()) => {
            info!(order_key = %key, "Order deleted via API");
            Json(serde_json::json!({ "status": "deleted" })).into_response()
        }
        Err(e) => db_error(e),
    }
}

#[derive(Deserialize)]
struct AlternativesParams {
    q: String,
    limit: Option<usize>,
}

/// GET /api/catalog/alternatives?q&limit
///
/// Candidate catalog entries for a product name that failed to resolve,
/// for manual remediation.
async fn catalog_alternatives(
    State(state): State<ApiState>,
    Query(params): Query<AlternativesParams>,
) -> impl IntoResponse {
    let snapshot = state.catalog.snapshot();
    let alternatives =
        Resolver::new(&snapshot).alternatives(&params.q, params.limit.unwrap_or(5).min(25));
    Json(alternatives).into_response()
}

/// POST /api/catalog/reload
async fn reload_catalog(State(state): State<ApiState>) -> impl IntoResponse {
    match state.catalog.reload() {
        Ok(entries) => {
            let version = state.catalog.snapshot().version();
            info!(version, entries, "Catalog reloaded via API");
            Json(serde_json::json!({ "version": version, "entries": entries }))
                .into_response()
        }
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Build the API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/orders", get(list_orders))
        .route("/api/orders/submit", post(submit_order))
        .route("/api/orders/failed/list", get(list_failed))
        .route("/api/orders/{key}", get(get_order).delete(delete_order))
        .route("/api/orders/{key}/history", get(get_history))
        .route("/api/orders/{key}/resend", post(resend_order))
        .route("/api/orders/{key}/mark-resolved", post(mark_resolved))
        .route("/api/stats", get(get_stats))
        .route("/api/catalog/alternatives", get(catalog_alternatives))
        .route("/api/catalog/reload", post(reload_catalog))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
