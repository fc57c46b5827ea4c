//! HTTP API
//!
//! Read and verification endpoints over the audit chain, mounted at
//! `/api/v1/audit`, plus the co-signing endpoint peer agencies call.
//! Access control is left to whatever sits in front of this router.

pub mod checkpoints;
pub mod entries;
pub mod witness;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::checkpoint::CheckpointService;
use crate::error::AuditError;
use crate::store::AuditStore;
use crate::witness::MultiAgencyWitness;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AuditStore>,
    pub checkpoints: Arc<CheckpointService>,
    /// Present when this server co-signs for peer agencies
    pub co_signer: Option<Arc<MultiAgencyWitness>>,
}

impl AppState {
    pub fn new(store: Arc<dyn AuditStore>, checkpoints: Arc<CheckpointService>) -> Self {
        Self {
            store,
            checkpoints,
            co_signer: None,
        }
    }

    pub fn with_co_signer(mut self, co_signer: Arc<MultiAgencyWitness>) -> Self {
        self.co_signer = Some(co_signer);
        self
    }
}

/// `{data, total}` envelope for list responses
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, total: i64) -> Self {
        Self { data, total }
    }
}

pub fn router(state: AppState) -> Router {
    let audit = Router::new()
        .route("/", get(entries::list_entries))
        .route("/verify", get(entries::verify_chain))
        .route(
            "/resource/:resource_type/:resource_id",
            get(entries::get_by_resource),
        )
        .route(
            "/checkpoints",
            get(checkpoints::list_checkpoints).post(checkpoints::create_checkpoint),
        )
        .route("/checkpoints/latest", get(checkpoints::get_latest_checkpoint))
        .route("/checkpoints/:id", get(checkpoints::get_checkpoint))
        .route("/checkpoints/:id/verify", get(checkpoints::verify_checkpoint))
        .route("/:entry_id", get(entries::get_entry));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/audit", audit)
        .route("/api/v1/witness/sign", post(witness::sign_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

impl AuditError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuditError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuditError::NotFound { .. } => StatusCode::NOT_FOUND,
            AuditError::Witness(_) => StatusCode::BAD_GATEWAY,
            AuditError::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
            AuditError::Storage(_)
            | AuditError::Crypto(_)
            | AuditError::Config(_)
            | AuditError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Parse an id from a path segment, rejecting malformed ones as bad requests.
pub(crate) fn parse_id(kind: &str, raw: &str) -> Result<Uuid, AuditError> {
    Uuid::parse_str(raw).map_err(|_| AuditError::bad_request(format!("invalid {} id: {}", kind, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AuditError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuditError::not_found("checkpoint", "x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuditError::Witness("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AuditError::Cancelled("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AuditError::Storage("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id("entry", "not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id("entry", &id.to_string()).unwrap(), id);
    }
}
