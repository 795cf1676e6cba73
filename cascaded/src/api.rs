//! HTTP API for the cascade daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Status (positions, protection, pending entries)
//! - Prometheus metrics
//! - Manual close of one position

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use cascade_domain::{OrderId, PendingOrder, Side, Symbol};

use crate::error::DaemonError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<Metrics>,
    pub paper_mode: bool,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub paper_mode: bool,
    pub hedge_mode: bool,
    pub open_positions: usize,
    pub positions: Vec<PositionSummary>,
    pub pending: Vec<PendingOrder>,
    pub busy: Vec<String>,
}

/// Summary of a position and its protection.
#[derive(Debug, Serialize, Deserialize)]
pub struct PositionSummary {
    pub key: String,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_order: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_order: Option<OrderId>,
    pub protected: bool,
}

/// Response after a close order was accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct CloseResponse {
    pub symbol: String,
    pub side: String,
    pub order_id: OrderId,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/positions/:symbol/:side/close", post(close_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Positions, protection state and pending entries.
async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let snapshot = state.reconciler.snapshot();

    let positions: Vec<PositionSummary> = snapshot
        .positions
        .into_iter()
        .map(|entry| PositionSummary {
            key: entry.key.to_string(),
            symbol: entry.key.symbol().to_string(),
            side: entry.key.side().to_string(),
            quantity: entry.position.abs_quantity(),
            entry_price: entry.position.entry_price,
            mark_price: entry.position.mark_price,
            leverage: entry.position.leverage,
            unrealized_pnl: entry.position.unrealized_pnl,
            stop_loss_order: entry.protection.stop_loss,
            take_profit_order: entry.protection.take_profit,
            protected: entry.protection.is_complete(),
        })
        .collect();

    Json(StatusResponse {
        paper_mode: state.paper_mode,
        hedge_mode: snapshot.hedge_mode,
        open_positions: positions.len(),
        positions,
        pending: snapshot.pending,
        busy: snapshot.locked.iter().map(ToString::to_string).collect(),
    })
}

/// Prometheus text format.
async fn metrics_handler(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.reconciler.snapshot();
    state.metrics.set_exposure(snapshot.positions.len(), snapshot.pending.len());

    let body = state.metrics.render().map_err(to_error_response)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Close one position at market.
async fn close_handler(
    State(state): State<Arc<ApiState>>,
    Path((symbol, side)): Path<(String, String)>,
) -> Result<Json<CloseResponse>, ApiError> {
    let symbol = Symbol::new(&symbol).map_err(|e| to_error_response(e.into()))?;
    let side: Side = side.parse().map_err(|e: cascade_domain::DomainError| to_error_response(e.into()))?;

    info!(%symbol, %side, "Close requested via API");
    let order_id = state
        .reconciler
        .close_position(&symbol, side)
        .await
        .map_err(to_error_response)?;

    Ok(Json(CloseResponse {
        symbol: symbol.to_string(),
        side: side.to_string(),
        order_id,
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn to_error_response(error: DaemonError) -> ApiError {
    let status = match &error {
        DaemonError::NotFound(_) => StatusCode::NOT_FOUND,
        DaemonError::Busy(_) => StatusCode::CONFLICT,
        DaemonError::Domain(_) => StatusCode::BAD_REQUEST,
        DaemonError::Exec(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolBook;
    use crate::reconciler::ReconcilerSettings;
    use axum::body::Body;
    use axum::http::Request;
    use cascade_domain::{MarginType, Position, PositionKey, PositionSide};
    use cascade_exec::{PendingOrderTracker, PositionModeCache, RecordingNotifier, StubExchange, StubMarket};
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use tower::util::ServiceExt;

    struct TestApp {
        exchange: Arc<StubExchange>,
        reconciler: Arc<Reconciler>,
        router: Router,
    }

    fn create_test_app() -> TestApp {
        let exchange = Arc::new(StubExchange::new());
        let reconciler = Arc::new(Reconciler::new(
            exchange.clone(),
            Arc::new(StubMarket::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(PendingOrderTracker::default()),
            Arc::new(PositionModeCache::new(false)),
            Arc::new(SymbolBook::default()),
            ReconcilerSettings::default(),
        ));
        let state = Arc::new(ApiState {
            reconciler: reconciler.clone(),
            metrics: Arc::new(Metrics::new().unwrap()),
            paper_mode: false,
        });
        TestApp {
            exchange,
            reconciler,
            router: create_router(state),
        }
    }

    fn eth_short() -> Position {
        Position {
            symbol: Symbol::new("ETHUSDT").unwrap(),
            amount: dec!(-2),
            entry_price: dec!(3000),
            mark_price: dec!(2990),
            leverage: 5,
            margin_type: MarginType::Cross,
            isolated_margin: dec!(0),
            position_side: PositionSide::Both,
            unrealized_pnl: dec!(20),
        }
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_status_lists_positions_with_protection() {
        let app = create_test_app();
        app.exchange.set_positions(vec![eth_short()]);
        app.reconciler.full_sync().await.unwrap();

        let response = app
            .router
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.open_positions, 1);
        assert_eq!(status.positions[0].key, "ETHUSDT_SHORT");
        assert_eq!(status.positions[0].quantity, dec!(2));
        assert!(status.positions[0].protected);
    }

    #[tokio::test]
    async fn test_close_unknown_position_is_404() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/positions/BTCUSDT/long/close")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_close_busy_position_is_409() {
        let app = create_test_app();
        app.exchange.set_positions(vec![eth_short()]);
        app.reconciler.full_sync().await.unwrap();
        let key = PositionKey::new(Symbol::new("ETHUSDT").unwrap(), Side::Short);
        let _held = app.reconciler.locks().try_acquire(&key).unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/positions/ETHUSDT/short/close")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_close_position() {
        let app = create_test_app();
        app.exchange.set_positions(vec![eth_short()]);
        app.reconciler.full_sync().await.unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/positions/ethusdt/SHORT/close")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let closed: CloseResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(closed.symbol, "ETHUSDT");
        assert_eq!(closed.side, "SHORT");
        assert!(app.exchange.positions_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_bad_side_is_400() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/positions/BTCUSDT/sideways/close")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.contains("cascade_open_positions 0"));
    }
}
