//! C8 — HTTP surface.
//!
//! Two `POST` endpoints over the dispatcher: `/query` runs one or more SQL
//! statements and returns the last statement's rows; `/parse` classifies a
//! statement without running it. CORS, bearer auth and access logging wrap
//! the router the way the teacher's `AppState`-based router does, adapted
//! to this engine's single shared `Dispatcher` instead of a session map.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::classify::Operation;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::engine::QueryResult;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
}

pub async fn run(state: AppState) -> anyhow::Result<()> {
    let port = state.config.http_port;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!(target: "icebase::server", "starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/query", post(query_handler).options(preflight))
        .route("/parse", post(parse_handler).options(preflight))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(access_log))
        .layer(cors)
        .with_state(state)
}

async fn preflight() -> impl IntoResponse {
    StatusCode::OK
}

async fn not_found(method: Method, uri: axum::http::Uri) -> impl IntoResponse {
    info!(target: "icebase::server", "404 {} {}", method, uri);
    (StatusCode::NOT_FOUND, "not found")
}

/// Bearer auth, skipped for `OPTIONS` so CORS preflight never needs a token.
async fn auth_middleware(State(state): State<AppState>, req: axum::extract::Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    if let Some(expected) = &state.config.bearer_token {
        let ok = req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", expected))
            .unwrap_or(false);
        if !ok {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    next.run(req).await
}

/// One line per request in the common log format plus elapsed time
/// (spec.md §6).
async fn access_log(req: axum::extract::Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    info!(
        target: "icebase::access",
        "\"{} {} HTTP/1.1\" {} {:.6}s",
        method,
        uri,
        status,
        elapsed.as_secs_f64()
    );
    response
}

pub(crate) fn operation_name(op: Operation) -> &'static str {
    match op {
        Operation::CreateTable => "create_table",
        Operation::Insert => "insert",
        Operation::Select => "select",
        Operation::Vacuum => "vacuum",
        Operation::Other => "other",
    }
}

async fn query_handler(State(state): State<AppState>, body: String) -> Response {
    let started = Instant::now();
    match state.dispatcher.handle_query(&body, state.config.query_splitting).await {
        Ok(result) => {
            let elapsed = started.elapsed().as_secs_f64();
            Json(query_response_body(&result, elapsed)).into_response()
        }
        Err(e) => (StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), e.to_string())
            .into_response(),
    }
}

pub(crate) fn query_response_body(result: &QueryResult, elapsed: f64) -> serde_json::Value {
    let meta: Vec<_> = result.columns.iter().map(|c| json!({"name": c.name, "type": c.type_name})).collect();
    json!({
        "meta": meta,
        "data": result.rows,
        "rows": result.row_count(),
        "statistics": { "elapsed": elapsed },
    })
}

async fn parse_handler(State(state): State<AppState>, body: String) -> Response {
    let classified = state.dispatcher.classify(&body);
    Json(json!({ "operation": operation_name(classified.operation), "table": classified.table })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DuckDbEngine, Engine as _};
    use crate::log_store::LogStore;
    use crate::storage::{FilesystemStorage, Storage};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_state(dir: &std::path::Path, bearer_token: Option<&str>) -> AppState {
        let storage: Arc<dyn Storage> = Arc::new(FilesystemStorage::new(dir).unwrap());
        let engine: Arc<dyn crate::engine::Engine> = Arc::new(DuckDbEngine::open_in_memory().unwrap());
        let log_store = Arc::new(LogStore::new(dir, storage.clone()));
        let dispatcher = Arc::new(Dispatcher::new(engine, log_store, storage));
        let mut config = Config::default();
        config.bearer_token = bearer_token.map(|s| s.to_string());
        AppState { dispatcher, config: Arc::new(config) }
    }

    /// S4 (spec §8): auth 401/200.
    #[tokio::test]
    async fn rejects_missing_bearer_token_and_accepts_correct_one() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Some("secret"));
        let app = build_router(state);

        let req = Request::builder().method("POST").uri("/query").body(Body::from("SELECT 1")).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/query")
            .header("Authorization", "Bearer secret")
            .body(Body::from("SELECT 1"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    /// S5 (spec §8): unknown route gets 404, server keeps serving afterwards.
    #[tokio::test]
    async fn unknown_route_is_404_and_server_stays_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), None);
        let app = build_router(state);

        let req = Request::builder().method("GET").uri("/no-such-route").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = Request::builder().method("POST").uri("/query").body(Body::from("SELECT 1")).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn parse_endpoint_classifies_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), None);
        let app = build_router(state);

        let req =
            Request::builder().method("POST").uri("/parse").body(Body::from("INSERT INTO t VALUES (1)")).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["operation"], "insert");
        assert_eq!(v["table"], "t");
    }
}
