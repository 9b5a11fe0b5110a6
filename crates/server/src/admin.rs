//! Pool administration handlers.

use crate::errors::ApiError;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use multiclient_core::{
    engine::MultiClient,
    types::{EngineId, EngineStatus, EngineTarget},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MAX_ENGINE_NAME_LENGTH: usize = 128;

/// Names end up in logs and metric labels, so only a conservative charset is accepted.
fn validate_target(target: &EngineTarget) -> Result<(), ApiError> {
    if target.name.is_empty() || target.name.len() > MAX_ENGINE_NAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Engine name must be 1 to {MAX_ENGINE_NAME_LENGTH} characters"
        )));
    }
    if !target.name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(ApiError::BadRequest(
            "Engine name may only contain alphanumerics, dash, underscore and dot".to_string(),
        ));
    }
    if target.address.is_empty() {
        return Err(ApiError::BadRequest("Engine address cannot be empty".to_string()));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineCreated {
    pub id: EngineId,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusHeight {
    pub height: Option<u64>,
}

pub async fn list_engines(State(client): State<Arc<MultiClient>>) -> Json<Vec<EngineStatus>> {
    Json(client.pool_status())
}

pub async fn add_engine(
    State(client): State<Arc<MultiClient>>,
    Json(target): Json<EngineTarget>,
) -> Result<(StatusCode, Json<EngineCreated>), ApiError> {
    validate_target(&target)?;
    let id = client.add_engine(target)?;
    Ok((StatusCode::CREATED, Json(EngineCreated { id })))
}

pub async fn remove_engine(
    State(client): State<Arc<MultiClient>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    client.remove_engine(EngineId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces an engine; an empty body reconnects to the same target.
pub async fn replace_engine(
    State(client): State<Arc<MultiClient>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<EngineCreated>, ApiError> {
    let target = if body.is_empty() {
        None
    } else {
        let target: EngineTarget = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid engine target: {e}")))?;
        validate_target(&target)?;
        Some(target)
    };

    let fresh = client.replace_engine(EngineId(id), target)?;
    info!(old_engine_id = id, engine_id = %fresh, "engine replaced via admin api");
    Ok(Json(EngineCreated { id: fresh }))
}

/// Runs an immediate health probe.
pub async fn probe_engine(
    State(client): State<Arc<MultiClient>>,
    Path(id): Path<u64>,
) -> Result<Json<EngineStatus>, ApiError> {
    let id = EngineId(id);
    match client.check_engine(id).await {
        Some(status) => Ok(Json(status)),
        None if client.pool_status().iter().any(|engine| engine.id == id) => {
            Err(ApiError::Conflict(format!("Probe of engine {id} already in progress")))
        }
        None => Err(ApiError::NotFound(format!("Engine {id} not found"))),
    }
}

pub async fn consensus_height(State(client): State<Arc<MultiClient>>) -> Json<ConsensusHeight> {
    Json(ConsensusHeight { height: client.consensus_height() })
}
