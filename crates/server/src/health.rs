use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use tillbot_db::ConversationRepository;

#[derive(Clone)]
pub struct HealthState {
    pub transport_mode: &'static str,
    pub assistant_configured: bool,
    pub repository: Arc<dyn ConversationRepository>,
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
    pub transport_mode: &'static str,
    pub assistant_configured: bool,
    pub conversations: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "tillbot-server runtime initialized".to_string(),
        },
        transport_mode: state.transport_mode,
        assistant_configured: state.assistant_configured,
        conversations: state.repository.count().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
