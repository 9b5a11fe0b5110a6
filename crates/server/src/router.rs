use crate::errors::ApiError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use multiclient_core::{
    engine::{HealthState, MultiClient},
    types::{
        BroadcastOptions, BroadcastPolicy, DispatchMode, EngineId, Request, RequestParameters,
        Response,
    },
};
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    #[default]
    Single,
    RoundRobin,
    Broadcast,
}

/// Body of `POST /api/v1/request`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub payload: Value,
    #[serde(default)]
    pub mode: ModeName,
    /// Broadcast reconciliation; ignored for other modes.
    pub policy: Option<BroadcastPolicy>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub archival: bool,
    pub engines: Option<Vec<EngineId>>,
    /// Broadcast fan-out limit.
    pub limit: Option<usize>,
}

impl SubmitRequest {
    /// # Errors
    ///
    /// Rejects zero timeouts and limits, and broadcast-only fields on other modes.
    pub fn into_request(self) -> Result<Request, ApiError> {
        if self.timeout_ms == Some(0) {
            return Err(ApiError::BadRequest("timeout_ms must be greater than 0".to_string()));
        }
        if self.limit == Some(0) {
            return Err(ApiError::BadRequest("limit must be greater than 0".to_string()));
        }

        let mode = match self.mode {
            ModeName::Broadcast => {
                DispatchMode::Broadcast(BroadcastOptions { policy: self.policy, limit: self.limit })
            }
            _ if self.policy.is_some() || self.limit.is_some() => {
                return Err(ApiError::BadRequest(
                    "policy and limit only apply to broadcast requests".to_string(),
                ))
            }
            ModeName::Single => DispatchMode::Single,
            ModeName::RoundRobin => DispatchMode::RoundRobin,
        };

        Ok(Request {
            payload: Arc::new(self.payload),
            mode,
            timeout: self.timeout_ms.map(Duration::from_millis),
            params: RequestParameters { archival: self.archival, engines: self.engines },
        })
    }
}

/// Dispatches one request to the engine pool.
pub async fn handle_request(
    State(client): State<Arc<MultiClient>>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<Response>, ApiError> {
    let request = body.into_request()?;
    debug!(mode = request.mode.as_str(), "request received");

    let response = client.send(&request).await?;
    Ok(Json(response))
}

pub async fn handle_metrics(State(client): State<Arc<MultiClient>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        client.metrics().render(),
    )
}

/// Reports 200 while at least one engine is Healthy or Degraded.
pub async fn handle_health(State(client): State<Arc<MultiClient>>) -> impl IntoResponse {
    let status = client.pool_status();
    let count = |state: HealthState| status.iter().filter(|engine| engine.state == state).count();
    let healthy = count(HealthState::Healthy);
    let degraded = count(HealthState::Degraded);
    let serving = healthy + degraded > 0;

    let body = serde_json::json!({
        "status": if serving { "healthy" } else { "unhealthy" },
        "engines": {
            "total": status.len(),
            "healthy": healthy,
            "degraded": degraded,
            "unknown": count(HealthState::Unknown),
            "dead": count(HealthState::Dead),
        },
        "consensus_height": client.consensus_height(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (if serving { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }, Json(body))
}
