use axum::{extract::State, response::Json};

use crate::api::AppState;
use crate::error::{AuditError, Result};
use crate::witness::{AgencySignature, WitnessRequest};

/// Co-sign a checkpoint for a peer agency.
pub async fn sign_request(
    State(state): State<AppState>,
    Json(request): Json<WitnessRequest>,
) -> Result<Json<AgencySignature>> {
    let signer = state
        .co_signer
        .as_ref()
        .ok_or_else(|| AuditError::not_found("witness signer", "multi_agency"))?;
    Ok(Json(signer.handle_sign_request(&request)?))
}
