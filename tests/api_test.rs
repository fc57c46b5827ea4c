mod common;

use audit_chain::api::{self, AppState};
use audit_chain::checkpoint::CheckpointService;
use audit_chain::store::{AuditStore, MemoryStore};
use audit_chain::witness::{
    AgencySignature, AgencyWitnessConfig, LocalAgency, MultiAgencyConfig, MultiAgencyWitness,
    Witness, WitnessRequest,
};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use common::*;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app_for(store: Arc<MemoryStore>) -> Router {
    let checkpoints = Arc::new(CheckpointService::new(store.clone(), Witness::default()));
    api::router(AppState::new(store, checkpoints))
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(app_for(Arc::new(MemoryStore::new())), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_entries_envelope() {
    let store = seeded_memory_store(12).await;
    let (status, body) = get(app_for(store), "/api/v1/audit?limit=5").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 12);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 5);
    assert_eq!(data[0]["sequence"], 12);
    assert_eq!(data[4]["sequence"], 8);
}

#[tokio::test]
async fn test_list_entries_ignores_bad_filters() {
    let store = seeded_memory_store(3).await;
    let (status, body) = get(
        app_for(store),
        "/api/v1/audit?actor_id=not-a-uuid&limit=abc&start_time=yesterday",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn test_get_entry_and_errors() {
    let store = seeded_memory_store(2).await;
    let head = store.recent(1).await.unwrap().remove(0);
    let app = app_for(store);

    let (status, body) = get(app.clone(), &format!("/api/v1/audit/{}", head.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"], head.hash);

    let (status, body) = get(app.clone(), &format!("/api/v1/audit/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = get(app, "/api/v1/audit/not-an-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_get_by_resource() {
    let store = Arc::new(MemoryStore::new());
    let target = case_entry(0);
    let resource_id = target.resource_id.unwrap();
    store.append(target).await.unwrap();
    seed(store.as_ref(), 3).await;

    let (status, body) = get(
        app_for(store),
        &format!("/api/v1/audit/resource/case/{}", resource_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["resource_id"], resource_id.to_string());
}

#[tokio::test]
async fn test_verify_endpoint_reports_tampering() {
    let store = seeded_memory_store(5).await;
    let app = app_for(store.clone());

    let (status, body) = get(app.clone(), "/api/v1/audit/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["checked"], 5);

    store
        .tamper(|entries| entries[1].action = "case.deleted".to_string())
        .await;

    let (status, body) = get(app, "/api/v1/audit/verify?details=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["content_invalid"], 1);
    assert_eq!(body["entries"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_checkpoint_routes() {
    let store = seeded_memory_store(4).await;
    let app = app_for(store);

    let (status, created) = send(app.clone(), Method::POST, "/api/v1/audit/checkpoints", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["entry_count"], 4);
    assert_eq!(created["witness_type"], "local");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, latest) = get(app.clone(), "/api/v1/audit/checkpoints/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], id);

    let (status, list) = get(app.clone(), "/api/v1/audit/checkpoints").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let (status, result) = get(app, &format!("/api/v1/audit/checkpoints/{}/verify", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["valid"], true);
    assert_eq!(result["checkpoint"]["id"], id);
}

#[tokio::test]
async fn test_checkpoint_on_empty_chain() {
    let app = app_for(Arc::new(MemoryStore::new()));

    let (status, body) = send(app.clone(), Method::POST, "/api/v1/audit/checkpoints", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = get(app, "/api/v1/audit/checkpoints/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sign_route() {
    let requester = LocalAgency::generate("MUP", "Ministry of Interior");
    let signer = MultiAgencyWitness::new(
        MultiAgencyConfig {
            agencies: vec![AgencyWitnessConfig {
                agency_code: requester.code.clone(),
                agency_name: requester.name.clone(),
                endpoint_url: "http://127.0.0.1:9".to_string(),
                public_key: requester.public_key_hex(),
            }],
            ..Default::default()
        },
        LocalAgency::generate("CSR", "Social Work Center"),
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let checkpoints = Arc::new(CheckpointService::new(store.clone(), Witness::default()));

    // Without a co-signer the route is not served
    let plain = api::router(AppState::new(store.clone(), checkpoints.clone()));
    let request = WitnessRequest {
        checkpoint_hash: "ab".repeat(32),
        last_sequence: 3,
        entry_count: 3,
        timestamp: Utc::now(),
        requesting_agency: "MUP".to_string(),
    };
    let payload = serde_json::to_value(&request).unwrap();
    let (status, _) = send(plain, Method::POST, "/api/v1/witness/sign", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let app = api::router(AppState::new(store, checkpoints).with_co_signer(Arc::new(signer)));
    let (status, body) = send(app.clone(), Method::POST, "/api/v1/witness/sign", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    let signature: AgencySignature = serde_json::from_value(body).unwrap();
    assert_eq!(signature.agency_code, "CSR");

    let mut unknown = request.clone();
    unknown.requesting_agency = "XXX".to_string();
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/witness/sign",
        Some(serde_json::to_value(&unknown).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown requesting agency"));
}
