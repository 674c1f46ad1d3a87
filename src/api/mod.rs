// REST API endpoints for the engine

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::error::{ModuleError, TaskError};
use crate::modules::{ModuleFilter, ModuleState, ModuleType};
use crate::task::{NewTask, TaskFilter, TaskStatus};
use crate::types::{ModuleId, TaskId};

pub type AppState = Arc<Engine>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/modules", get(list_modules))
        .route("/modules/discover", post(discover_modules))
        .route("/modules/{id}", get(get_module))
        .route("/modules/{id}/load", post(load_module))
        .route("/modules/{id}/unload", post(unload_module))
        .route("/modules/{id}/reload", post(reload_module))
        .route("/queue/stats", get(queue_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Error body: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "MODULE_NOT_FOUND" | "TASK_NOT_FOUND" => StatusCode::NOT_FOUND,
        "IN_USE"
        | "NOT_LOADED"
        | "DEPENDENCY_NOT_READY"
        | "ALREADY_TERMINAL"
        | "INVALID_TRANSITION" => StatusCode::CONFLICT,
        "VALIDATION_ERROR"
        | "MANIFEST_PARSE_ERROR"
        | "DEPENDENCY_CYCLE"
        | "DEPENDENCY_VERSION_MISMATCH"
        | "UNKNOWN_ENTRY"
        | "MODULE_SETUP_FAILED"
        | "NO_CAPABLE_EXECUTOR" => StatusCode::UNPROCESSABLE_ENTITY,
        "QUEUE_STOPPED" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ModuleError> for ApiError {
    fn from(e: ModuleError) -> Self {
        Self {
            status: status_for(e.code()),
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        Self {
            status: status_for(e.code()),
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let stats = state.stats().await;
    Json(json!({
        "status": if stats.queue.running { "healthy" } else { "stopping" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "workers": stats.queue.workers,
        "modules": stats.modules,
    }))
}

async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let task = state.submit(request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

#[derive(Debug, Deserialize)]
struct TaskQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let tasks = state
        .list_tasks(&TaskFilter {
            status,
            limit: query.limit,
        })
        .await;

    Ok(Json(json!({
        "tasks": tasks,
        "count": tasks.len(),
    })))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let task = state.task(&TaskId::new(id)).await?;
    Ok(Json(json!({ "task": task })))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state.cancel_task(&TaskId::new(id)).await?;
    Ok(Json(json!({ "task": task })))
}

#[derive(Debug, Deserialize)]
struct ModuleQuery {
    #[serde(rename = "type")]
    module_type: Option<String>,
    state: Option<String>,
}

async fn list_modules(
    State(state): State<AppState>,
    Query(query): Query<ModuleQuery>,
) -> ApiResult<Json<Value>> {
    let filter = ModuleFilter {
        module_type: query
            .module_type
            .as_deref()
            .map(str::parse::<ModuleType>)
            .transpose()
            .map_err(ApiError::bad_request)?,
        state: query
            .state
            .as_deref()
            .map(str::parse::<ModuleState>)
            .transpose()
            .map_err(ApiError::bad_request)?,
    };

    let modules = state.list_modules(&filter).await;
    Ok(Json(json!({
        "modules": modules,
        "count": modules.len(),
    })))
}

async fn get_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let details = state.module(&ModuleId::new(id)).await?;
    Ok(Json(json!(details)))
}

async fn load_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.load_module(&ModuleId::new(id)).await?;
    Ok(Json(json!({ "status": status })))
}

async fn unload_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.unload_module(&ModuleId::new(id)).await?;
    Ok(Json(json!({ "status": status })))
}

async fn reload_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = state.reload_module(&ModuleId::new(id)).await?;
    Ok(Json(json!({ "status": status })))
}

async fn discover_modules(State(state): State<AppState>) -> Json<Value> {
    // Mutating operation: rescan the modules directory.
    let summary = state.discover_modules().await;
    Json(json!({
        "status": "ok",
        "discovery": summary,
    }))
}

async fn queue_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.stats().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{test_factories, write_manifest};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app() -> (TempDir, AppState, Router) {
        let root = TempDir::new().unwrap();
        write_manifest(
            root.path(),
            "executors",
            "echo",
            "id: echo\nname: Echo\nversion: 1.0.0\ntype: executor\nentry_point: test:echo\ncapabilities: [generation]\n",
        );
        let config = EngineConfig {
            modules_dir: root.path().to_path_buf(),
            workers: 1,
            unload_grace: Duration::from_millis(100),
            default_task_timeout: None,
            default_max_retries: 0,
            autoload: vec![ModuleId::new("echo")],
            api_bind: "127.0.0.1:0".to_string(),
        };
        let engine = Arc::new(Engine::new(config, test_factories()));
        engine.start().await;
        let router = create_router(Arc::clone(&engine));
        (root, engine, router)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (_root, engine, router) = app().await;
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_then_fetch_task() {
        let (_root, engine, router) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/tasks",
            Some(json!({"type": "generation", "priority": "urgent", "parameters": {"x": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["task"]["priority"], json!("urgent"));
        let id = body["task"]["id"].as_str().unwrap().to_string();

        engine
            .wait_task(&TaskId::new(id.clone()), Duration::from_secs(5))
            .await
            .unwrap();
        let (status, body) = call(&router, "GET", &format!("/tasks/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["status"], json!("completed"));

        let (_, body) = call(&router, "GET", "/tasks?status=completed&limit=5", None).await;
        assert_eq!(body["count"], json!(1));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_bodies_and_status_codes() {
        let (_root, engine, router) = app().await;

        let (status, body) = call(&router, "GET", "/tasks/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("TASK_NOT_FOUND"));

        let (status, body) = call(&router, "POST", "/modules/ghost/load", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("MODULE_NOT_FOUND"));

        let (status, _) = call(&router, "GET", "/tasks?status=weird", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        engine.shutdown().await;
        let (status, body) = call(
            &router,
            "POST",
            "/tasks",
            Some(json!({"type": "generation"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], json!("QUEUE_STOPPED"));
    }

    #[tokio::test]
    async fn test_setup_failure_is_unprocessable() {
        let (root, engine, router) = app().await;
        write_manifest(
            root.path(),
            "executors",
            "fragile",
            "id: fragile\nname: Fragile\nversion: 1.0.0\ntype: executor\nentry_point: test:setup_fail\n",
        );
        let (status, _) = call(&router, "POST", "/modules/discover", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, "POST", "/modules/fragile/load", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], json!("MODULE_SETUP_FAILED"));

        let (status, body) = call(&router, "GET", "/modules/fragile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["state"], json!("failed"));
        engine.shutdown().await;
    }

    #[test]
    fn test_status_codes_for_module_errors() {
        assert_eq!(status_for("MODULE_SETUP_FAILED"), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for("DEPENDENCY_NOT_READY"), StatusCode::CONFLICT);
        assert_eq!(status_for("SOMETHING_ELSE"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_module_lifecycle_routes() {
        let (_root, engine, router) = app().await;

        let (status, body) = call(&router, "GET", "/modules?type=executor&state=ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], json!(1));

        let (status, body) = call(&router, "POST", "/modules/echo/unload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["state"], json!("unloaded"));

        let (status, body) = call(&router, "POST", "/modules/echo/unload", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], json!("NOT_LOADED"));

        let (status, body) = call(&router, "POST", "/modules/echo/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["state"], json!("ready"));

        let (status, body) = call(&router, "GET", "/modules/echo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["manifest"]["entry_point"], json!("test:echo"));

        let (status, body) = call(&router, "POST", "/modules/discover", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["discovery"]["unchanged"], json!(["echo"]));

        let (status, body) = call(&router, "GET", "/queue/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue"]["workers"]["total"], json!(1));
        engine.shutdown().await;
    }
}
