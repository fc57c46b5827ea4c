use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use std::collections::HashMap;

use crate::api::{parse_id, AppState, ListResponse};
use crate::checkpoint::{Checkpoint, CheckpointVerifyResult};
use crate::error::Result;

pub async fn list_checkpoints(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse<Checkpoint>>> {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let checkpoints = state.checkpoints.list_checkpoints(limit).await?;
    let total = checkpoints.len() as i64;
    Ok(Json(ListResponse::new(checkpoints, total)))
}

pub async fn create_checkpoint(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Checkpoint>)> {
    let checkpoint = state.checkpoints.create_checkpoint().await?;
    Ok((StatusCode::CREATED, Json(checkpoint)))
}

pub async fn get_latest_checkpoint(State(state): State<AppState>) -> Result<Json<Checkpoint>> {
    Ok(Json(state.checkpoints.get_latest_checkpoint().await?))
}

pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Checkpoint>> {
    let id = parse_id("checkpoint", &id)?;
    Ok(Json(state.checkpoints.get_checkpoint(id).await?))
}

pub async fn verify_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointVerifyResult>> {
    let id = parse_id("checkpoint", &id)?;
    Ok(Json(state.checkpoints.verify_checkpoint(id).await?))
}
