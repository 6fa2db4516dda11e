//! REST API server for the claims processor
//!
//! Same unit of work as the queue worker, one claim per request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::models::{InboundClaim, UNKNOWN_CUSTOMER};
use crate::processor::ClaimProcessor;

/// =============================
/// Request Models
/// =============================

fn unknown_customer() -> String {
    UNKNOWN_CUSTOMER.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub id: Option<String>,
    #[serde(alias = "text")]
    pub message: String,
    #[serde(rename = "customerId", alias = "clientId", default = "unknown_customer")]
    pub customer_id: String,
}

impl ClaimRequest {
    fn into_claim(self) -> InboundClaim {
        InboundClaim {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: self.message,
            customer_id: self.customer_id,
        }
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub processor: Arc<ClaimProcessor>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Claims Endpoint
/// =============================

async fn process_claim(
    State(state): State<ApiState>,
    Json(req): Json<ClaimRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty".into())),
        );
    }

    let claim = req.into_claim();
    info!(claim_id = %claim.id, customer_id = %claim.customer_id, "Received claim");

    let resolution = state.processor.process(claim).await;
    (StatusCode::OK, Json(ApiResponse::success(resolution)))
}

/// =============================
/// Session Endpoint
/// =============================

async fn clear_session(
    State(state): State<ApiState>,
    Path(customer_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.processor.clear_session(&customer_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "customerId": customer_id,
                "cleared": true,
            }))),
        ),
        Err(e) => {
            error!(customer_id = %customer_id, error = %e, "Failed to clear session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to clear session: {}", e))),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(processor: Arc<ClaimProcessor>) -> Router {
    let state = ApiState { processor };

    Router::new()
        .route("/health", get(health))
        .route("/api/claims", post(process_claim))
        .route("/api/sessions/:customer_id", delete(clear_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    processor: Arc<ClaimProcessor>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(processor);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
