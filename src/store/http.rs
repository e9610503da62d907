//! Admin HTTP API for the store server
//!
//! - `GET /health` liveness
//! - `GET /v1/keys?prefix=/svc/echo` registered pairs under a prefix
//! - `GET /v1/stats` key and lease counts

use crate::common::timestamp_now_millis;
use crate::store::{CoordinationStore, MemoryStore};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<MemoryStore>,
}

#[derive(Debug, Deserialize)]
pub struct KeysQuery {
    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_prefix() -> String {
    "/".to_string()
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/keys", get(list_keys))
        .route("/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "timestamp": timestamp_now_millis(),
    }))
}

async fn list_keys(
    State(state): State<AdminState>,
    Query(query): Query<KeysQuery>,
) -> impl IntoResponse {
    match state.store.get_prefix(&query.prefix).await {
        Ok(kvs) => (StatusCode::OK, Json(json!({ "prefix": query.prefix, "kvs": kvs }))),
        Err(e) => {
            tracing::error!("list keys under {} failed: {}", query.prefix, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn stats(State(state): State<AdminState>) -> impl IntoResponse {
    match state.store.stats() {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let resp = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(AdminState {
            store: Arc::new(MemoryStore::new()),
        });
        let (status, body) = get_json(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_keys_and_stats() {
        let store = Arc::new(MemoryStore::new());
        let lease = store.grant(30).await.unwrap();
        store
            .put("/svc/echo/1.0/10.0.0.1:9000", "10.0.0.1:9000", Some(lease))
            .await
            .unwrap();
        store.put("/other/x", "x", None).await.unwrap();
        let router = create_router(AdminState { store });

        let (status, body) = get_json(router.clone(), "/v1/keys?prefix=/svc/echo").await;
        assert_eq!(status, StatusCode::OK);
        let kvs = body["kvs"].as_array().unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0]["value"], "10.0.0.1:9000");
        assert_eq!(kvs[0]["lease"], lease.0);

        let (_, body) = get_json(router.clone(), "/v1/keys").await;
        assert_eq!(body["kvs"].as_array().unwrap().len(), 2);

        let (_, body) = get_json(router, "/v1/stats").await;
        assert_eq!(body["keys"], 2);
        assert_eq!(body["leases"], 1);
    }
}
