use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::api::{parse_id, AppState, ListResponse};
use crate::audit::{ActorType, AuditEntry, VerifyResult};
use crate::error::Result;
use crate::store::{self, ListFilter};

type Params = Query<HashMap<String, String>>;

/// Build a filter from query parameters. Values that do not parse are
/// ignored rather than rejected.
pub fn filter_from_params(params: &HashMap<String, String>) -> ListFilter {
    fn text(params: &HashMap<String, String>, key: &str) -> Option<String> {
        params.get(key).filter(|v| !v.is_empty()).cloned()
    }
    fn parsed<T: FromStr>(params: &HashMap<String, String>, key: &str) -> Option<T> {
        params.get(key).and_then(|v| v.parse().ok())
    }
    fn time(params: &HashMap<String, String>, key: &str) -> Option<DateTime<Utc>> {
        params
            .get(key)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    ListFilter {
        actor_id: parsed::<Uuid>(params, "actor_id"),
        actor_type: parsed::<ActorType>(params, "actor_type"),
        action: text(params, "action"),
        resource_type: text(params, "resource_type"),
        resource_id: parsed::<Uuid>(params, "resource_id"),
        start_time: time(params, "start_time"),
        end_time: time(params, "end_time"),
        limit: parsed(params, "limit").unwrap_or(0),
        offset: parsed(params, "offset").unwrap_or(0),
    }
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<ListResponse<AuditEntry>>> {
    let filter = filter_from_params(&params);
    let (entries, total) = state.store.list(&filter).await?;
    Ok(Json(ListResponse::new(entries, total)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<Json<AuditEntry>> {
    let id = parse_id("entry", &entry_id)?;
    Ok(Json(state.store.find_by_id(id).await?))
}

pub async fn verify_chain(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<VerifyResult>> {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(store::DEFAULT_VERIFY_LIMIT);
    let details = params
        .get("details")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let result = store::verify_chain(state.store.as_ref(), limit, details).await?;
    Ok(Json(result))
}

pub async fn get_by_resource(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    Query(params): Params,
) -> Result<Json<ListResponse<AuditEntry>>> {
    let resource_id = parse_id("resource", &resource_id)?;
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(store::DEFAULT_LIST_LIMIT);

    let entries = state
        .store
        .get_by_resource(&resource_type, resource_id, limit)
        .await?;
    let total = entries.len() as i64;
    Ok(Json(ListResponse::new(entries, total)))
}
