//! Read-only status surface, mirroring the teacher's `serve_cmd` HTML/JSON
//! split: a tiny index page plus JSON endpoints for projects and tasks.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use marcus_core::task::Project;
use marcus_core::{Coordinator, ProjectId, TaskId};

use crate::error::ApiError;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/tasks/{id}", get(get_task))
        .with_state(coordinator)
}

async fn index(State(coordinator): State<Arc<Coordinator>>) -> Response {
    let active = coordinator
        .registry()
        .active_project()
        .await
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>marcus</title></head><body>\
<h1>marcus</h1>\
<p>active project: {active}</p>\
<p><a href=\"/api/projects\">/api/projects</a></p>\
</body></html>"
    );
    Html(html).into_response()
}

async fn list_projects(
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let active = coordinator.registry().active_project().await;
    let mut projects = Vec::new();
    if let Some(id) = active {
        projects.push(coordinator.registry().get_project(&id).await?);
    }
    Ok(Json(projects))
}

async fn get_project(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let project_id = ProjectId::new(id);
    let project = coordinator.registry().get_project(&project_id).await?;
    let status = coordinator.get_project_status(&project_id).await?;
    let health = coordinator.check_board_health(&project_id).await?;
    Ok(Json(serde_json::json!({
        "project": project,
        "status": status,
        "health": health,
    })))
}

async fn get_task(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_id = TaskId::new(id);
    let (project_id, task) = coordinator.registry().find_task(&task_id).await?;
    let context = coordinator.get_task_context(&project_id, &task_id).await?;
    Ok(Json(serde_json::json!({
        "task": task,
        "context": context,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use marcus_core::CoordinatorConfig;
    use tower::ServiceExt;

    async fn test_coordinator() -> (Arc<Coordinator>, tempfile::TempDir) {
        let registry = Arc::new(marcus_core::task::TaskRegistry::new());
        let kv = marcus_test_utils::memory_store();
        let events = marcus_core::EventBus::new();
        let (log, dir) = marcus_test_utils::temp_conversation_log();
        let log = Arc::new(log);
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig::default(),
            registry,
            kv,
            events,
            log,
            Arc::new(marcus_core::interfaces::NullBoardProvider),
            Arc::new(marcus_core::interfaces::NullProjectPlanner),
            Arc::new(marcus_core::interfaces::NullLanguageModel),
            Arc::new(marcus_core::lease::SystemClock),
        ));
        (coordinator, dir)
    }

    #[tokio::test]
    async fn index_returns_html() {
        let (coordinator, _dir) = test_coordinator().await;
        let app = router(coordinator);
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_projects_empty_without_registration() {
        let (coordinator, _dir) = test_coordinator().await;
        let app = router(coordinator);
        let resp = app
            .oneshot(Request::builder().uri("/api/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn get_task_not_found() {
        let (coordinator, _dir) = test_coordinator().await;
        let app = router(coordinator);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
