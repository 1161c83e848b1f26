//! JSON API over the mirror: read endpoints for the dashboard, sync
//! triggers, run history and scheduler control. The dashboard never talks to
//! the external service; everything served here comes from the local store.

use std::sync::Arc;

use aim_core::SyncKind;
use aim_store::{MirrorStore, StoreError};
use aim_sync::{SyncEngine, SyncError, SyncScheduler};
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "aim-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MirrorStore>,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<SyncScheduler>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(overview_handler))
        .route("/assets", get(list_assets_handler))
        .route("/assets/{id}", get(get_asset_handler))
        .route("/users", get(list_users_handler))
        .route("/users/{id}", get(get_user_handler))
        .route("/sync", post(trigger_all_handler))
        .route("/sync/users", post(trigger_users_handler))
        .route("/sync/assets", post(trigger_assets_handler))
        .route("/sync/status", get(sync_status_handler))
        .route("/sync/runs", get(sync_runs_handler))
        .route("/sync/schedule", get(schedule_status_handler))
        .route("/sync/schedule/start", post(schedule_start_handler))
        .route("/sync/schedule/stop", post(schedule_stop_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct RunsQuery {
    limit: Option<i64>,
}

async fn overview_handler(State(state): State<Arc<AppState>>) -> Response {
    let assets = match state.store.list_assets().await {
        Ok(assets) => assets,
        Err(err) => return store_error(err),
    };
    let users = match state.store.list_users().await {
        Ok(users) => users,
        Err(err) => return store_error(err),
    };
    let latest_run = match state.store.recent_runs(1).await {
        Ok(runs) => runs.into_iter().next(),
        Err(err) => return store_error(err),
    };
    Json(json!({
        "assets": assets.len(),
        "users": users.len(),
        "latest_run": latest_run,
    }))
    .into_response()
}

async fn list_assets_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_assets().await {
        Ok(assets) => Json(assets).into_response(),
        Err(err) => store_error(err),
    }
}

async fn get_asset_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Response {
    match state.store.get_asset(id).await {
        Ok(Some(asset)) => Json(asset).into_response(),
        Ok(None) => not_found("asset"),
        Err(err) => store_error(err),
    }
}

async fn list_users_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_users().await {
        Ok(users) => Json(users).into_response(),
        Err(err) => store_error(err),
    }
}

async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Response {
    match state.store.get_user(id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => not_found("user"),
        Err(err) => store_error(err),
    }
}

async fn trigger_all_handler(State(state): State<Arc<AppState>>) -> Response {
    trigger(&state, SyncKind::All)
}

async fn trigger_users_handler(State(state): State<Arc<AppState>>) -> Response {
    trigger(&state, SyncKind::Users)
}

async fn trigger_assets_handler(State(state): State<Arc<AppState>>) -> Response {
    trigger(&state, SyncKind::Assets)
}

/// Kick a background run. The caller gets an immediate accept/reject; the
/// run itself proceeds off the request task.
fn trigger(state: &AppState, kind: SyncKind) -> Response {
    match state.engine.spawn(kind) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "scheduled", "kind": kind})),
        )
            .into_response(),
        Err(SyncError::AlreadyRunning(kind)) => (
            StatusCode::CONFLICT,
            Json(json!({"status": "already_running", "kind": kind})),
        )
            .into_response(),
        Err(err) => {
            error!(%kind, %err, "failed to start sync");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Response {
    let statuses: serde_json::Map<String, serde_json::Value> = state
        .engine
        .statuses()
        .into_iter()
        .map(|(kind, sync_state)| (kind.as_str().to_string(), json!(sync_state)))
        .collect();
    Json(serde_json::Value::Object(statuses)).into_response()
}

async fn sync_runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    match state.store.recent_runs(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => store_error(err),
    }
}

async fn schedule_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.status().await).into_response()
}

async fn schedule_start_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.start().await {
        Ok(()) => Json(state.scheduler.status().await).into_response(),
        Err(err) => {
            error!(%err, "failed to start scheduler");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn schedule_stop_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.stop().await {
        Ok(()) => Json(state.scheduler.status().await).into_response(),
        Err(err) => {
            error!(%err, "failed to stop scheduler");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

fn not_found(entity: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("{entity} not found")})),
    )
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    error!(%err, "mirror store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_client::{ClientError, InventorySource};
    use aim_store::MemoryStore;
    use aim_sync::default_sync_crons;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::Value as JsonValue;
    use tower::ServiceExt;

    /// Holds fetches open until dropped so a triggered run stays Running.
    struct GatedSource {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl InventorySource for GatedSource {
        async fn fetch_users(&self) -> Result<Vec<JsonValue>, ClientError> {
            self.gate.notified().await;
            Ok(vec![])
        }

        async fn fetch_assets(&self) -> Result<Vec<JsonValue>, ClientError> {
            self.gate.notified().await;
            Ok(vec![])
        }
    }

    fn test_state() -> AppState {
        let store: Arc<dyn MirrorStore> = Arc::new(MemoryStore::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::new(GatedSource {
                gate: Arc::new(tokio::sync::Notify::new()),
            }),
            Arc::clone(&store),
        ));
        let scheduler = Arc::new(SyncScheduler::new(Arc::clone(&engine), default_sync_crons()));
        AppState {
            store,
            engine,
            scheduler,
        }
    }

    async fn body_json(resp: Response) -> JsonValue {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn overview_and_collections_serve_empty_mirror() {
        let app = app(test_state());

        let resp = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let overview = body_json(resp).await;
        assert_eq!(overview["assets"], 0);
        assert_eq!(overview["users"], 0);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/assets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn missing_asset_is_404() {
        let app = app(test_state());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/assets/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn second_sync_trigger_conflicts_while_first_runs() {
        let app = app(test_state());

        let first = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/assets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/assets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(second).await["status"], "already_running");
    }

    #[tokio::test]
    async fn schedule_endpoints_report_and_toggle() {
        let app = app(test_state());

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/sync/schedule")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let status = body_json(resp).await;
        assert_eq!(status["running"], false);
        assert_eq!(status["triggers"].as_array().unwrap().len(), 4);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/schedule/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["running"], true);
    }
}
