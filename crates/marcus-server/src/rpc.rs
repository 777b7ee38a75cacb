//! Agent RPC surface: one JSON POST endpoint per tool, mirroring the
//! teacher's `serve_cmd` router but dispatching to `Coordinator` instead of
//! running SQL directly. No business logic lives here -- every handler
//! just deserialises its input, calls the matching `Coordinator` method,
//! and serialises the result.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use marcus_core::task::ArtifactType;
use marcus_core::{AgentId, Coordinator, ProjectId, TaskId};

use crate::error::ApiError;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/rpc/register_agent", post(register_agent))
        .route("/rpc/request_next_task", post(request_next_task))
        .route("/rpc/report_task_progress", post(report_task_progress))
        .route("/rpc/report_blocker", post(report_blocker))
        .route("/rpc/get_task_context", post(get_task_context))
        .route("/rpc/log_decision", post(log_decision))
        .route("/rpc/log_artifact", post(log_artifact))
        .route("/rpc/get_project_status", post(get_project_status))
        .with_state(coordinator)
}

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    id: String,
    name: String,
    role: String,
    #[serde(default)]
    skills: Vec<String>,
}

async fn register_agent(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator
        .register_agent(AgentId::new(req.id), req.name, req.role, req.skills)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct RequestNextTaskRequest {
    agent_id: String,
}

async fn request_next_task(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RequestNextTaskRequest>,
) -> Result<Json<marcus_core::coordinator::RequestNextTaskResponse>, ApiError> {
    let response = coordinator
        .request_next_task(&AgentId::new(req.agent_id), CancellationToken::new())
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ReportTaskProgressRequest {
    agent_id: String,
    task_id: String,
    status: String,
    progress: u8,
    #[serde(default)]
    message: String,
}

async fn report_task_progress(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportTaskProgressRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator
        .report_task_progress(
            &AgentId::new(req.agent_id),
            &TaskId::new(req.task_id),
            &req.status,
            req.progress,
            &req.message,
        )
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct ReportBlockerRequest {
    agent_id: String,
    task_id: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct ReportBlockerResponse {
    suggestions: Vec<String>,
}

async fn report_blocker(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportBlockerRequest>,
) -> Result<Json<ReportBlockerResponse>, ApiError> {
    let suggestions = coordinator
        .report_blocker(&AgentId::new(req.agent_id), &TaskId::new(req.task_id), &req.description)
        .await?;
    Ok(Json(ReportBlockerResponse { suggestions }))
}

#[derive(Debug, Deserialize)]
struct GetTaskContextRequest {
    task_id: String,
}

async fn get_task_context(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<GetTaskContextRequest>,
) -> Result<Json<marcus_core::context::TaskContext>, ApiError> {
    let task_id = TaskId::new(req.task_id);
    let (project_id, _) = coordinator.registry().find_task(&task_id).await?;
    let context = coordinator.get_task_context(&project_id, &task_id).await?;
    Ok(Json(context))
}

#[derive(Debug, Deserialize)]
struct LogDecisionRequest {
    agent_id: String,
    task_id: String,
    text: String,
}

async fn log_decision(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<LogDecisionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_id = TaskId::new(req.task_id);
    let (project_id, _) = coordinator.registry().find_task(&task_id).await?;
    coordinator
        .log_decision(&project_id, &task_id, &AgentId::new(req.agent_id), &req.text)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct LogArtifactRequest {
    agent_id: String,
    task_id: String,
    filename: String,
    /// Accepted for wire compatibility with the documented tool surface;
    /// the core persists artifact metadata only, not byte content.
    #[serde(default)]
    #[allow(dead_code)]
    content: String,
    #[serde(rename = "type")]
    artifact_type: ArtifactType,
    #[serde(default)]
    description: String,
    location: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogArtifactResponse {
    stored_location: String,
}

async fn log_artifact(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<LogArtifactRequest>,
) -> Result<Json<LogArtifactResponse>, ApiError> {
    let stored_location = coordinator
        .log_artifact(
            &TaskId::new(req.task_id),
            &AgentId::new(req.agent_id),
            &req.filename,
            req.artifact_type,
            &req.description,
            req.location,
        )
        .await?;
    Ok(Json(LogArtifactResponse { stored_location }))
}

#[derive(Debug, Deserialize, Default)]
struct GetProjectStatusRequest {
    project_id: Option<String>,
}

async fn get_project_status(
    State(coordinator): State<Arc<Coordinator>>,
    body: Option<Json<GetProjectStatusRequest>>,
) -> Result<Json<marcus_core::coordinator::ProjectStatus>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let project_id = match req.project_id {
        Some(id) => ProjectId::new(id),
        None => coordinator
            .registry()
            .active_project()
            .await
            .ok_or_else(|| marcus_core::CoreError::not_found("no active project"))?,
    };
    let status = coordinator.get_project_status(&project_id).await?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use marcus_core::task::{Priority, Project, Task, TaskStatus};
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

    async fn post(app: Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn register_agent_then_request_next_task() {
        let (coordinator, _dir) = test_coordinator().await;
        let project_id = ProjectId::new("p1");
        coordinator
            .register_project(Project {
                id: project_id.clone(),
                name: "P1".into(),
                board_binding: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        coordinator
            .registry()
            .add_tasks(
                &project_id,
                vec![Task {
                    id: TaskId::new("t1"),
                    project_id: project_id.clone(),
                    name: "Do thing".into(),
                    description: "".into(),
                    labels: vec![],
                    priority: Priority::Medium,
                    status: TaskStatus::Todo,
                    dependencies: vec![],
                    estimated_hours: Some(1.0),
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                }],
            )
            .await
            .unwrap();

        let app = router(coordinator.clone());
        let resp = post(
            app.clone(),
            "/rpc/register_agent",
            serde_json::json!({ "id": "a1", "name": "Agent", "role": "engineer", "skills": [] }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = post(app, "/rpc/request_next_task", serde_json::json!({ "agent_id": "a1" })).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["task_envelope"]["task"]["id"] == "t1");
    }

    #[tokio::test]
    async fn get_project_status_not_found_without_active_project() {
        let (coordinator, _dir) = test_coordinator().await;
        let app = router(coordinator);
        let resp = post(app, "/rpc/get_project_status", serde_json::json!({})).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
