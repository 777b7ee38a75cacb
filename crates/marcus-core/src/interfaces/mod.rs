//! External collaborator interfaces: `BoardProvider`, `ProjectPlanner`, and
//! `LanguageModel`. All are object-safe `async_trait`s, grounded in the
//! teacher's `Harness` trait (spawn/events/send/kill, stored as
//! `Box<dyn Harness>`): the core never depends on a concrete board, planner,
//! or model implementation, only on these interfaces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::ids::{ProjectId, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardTask {
    pub id: TaskId,
    pub title: String,
    pub labels: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardProject {
    pub id: ProjectId,
    pub name: String,
}

/// Kanban adapter interface: read/write of cards, lists, labels,
/// checklists. Implementations retry writes with exponential backoff
/// (1s/2s/4s/8s/16s, 5 attempts) and surface `CoreError::ExternalFailure`
/// plus a `kanban_error` event on exhaustion -- that retry policy lives in
/// the Coordinator, not here, so every adapter gets it identically.
#[async_trait]
pub trait BoardProvider: Send + Sync {
    async fn list_tasks(&self, project_id: &ProjectId) -> Result<Vec<BoardTask>>;
    async fn create_task(&self, project_id: &ProjectId, title: &str, labels: &[String]) -> Result<TaskId>;
    async fn update_task_status(&self, task_id: &TaskId, status: &str) -> Result<()>;
    async fn add_comment(&self, task_id: &TaskId, text: &str) -> Result<()>;
    async fn add_checklist(&self, task_id: &TaskId, items: &[String]) -> Result<()>;
    async fn list_projects(&self) -> Result<Vec<BoardProject>>;
}

/// No board configured: in-memory, empty. Lets the core run and be tested
/// without any Kanban adapter wired up.
pub struct NullBoardProvider;

#[async_trait]
impl BoardProvider for NullBoardProvider {
    async fn list_tasks(&self, _project_id: &ProjectId) -> Result<Vec<BoardTask>> {
        Ok(Vec::new())
    }

    async fn create_task(&self, _project_id: &ProjectId, _title: &str, _labels: &[String]) -> Result<TaskId> {
        Ok(TaskId::generate())
    }

    async fn update_task_status(&self, _task_id: &TaskId, _status: &str) -> Result<()> {
        Ok(())
    }

    async fn add_comment(&self, _task_id: &TaskId, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn add_checklist(&self, _task_id: &TaskId, _items: &[String]) -> Result<()> {
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<BoardProject>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub name: String,
    pub description: String,
    pub labels: Vec<String>,
    pub depends_on: Vec<String>,
}

/// Turns a free-text project description into a task graph.
#[async_trait]
pub trait ProjectPlanner: Send + Sync {
    async fn plan(&self, description: &str) -> Result<Vec<PlannedTask>>;
}

/// No planner configured: returns an empty plan. Useful for boards that
/// are already fully structured.
pub struct NullProjectPlanner;

#[async_trait]
impl ProjectPlanner for NullProjectPlanner {
    async fn plan(&self, _description: &str) -> Result<Vec<PlannedTask>> {
        Ok(Vec::new())
    }
}

/// A generation budget, e.g. a token cap, passed to `generate`.
#[derive(Debug, Clone, Copy)]
pub struct GenerationBudget {
    pub max_tokens: u32,
}

/// The LLM client used for planning and per-assignment instruction
/// synthesis. Isolated behind this interface so the core remains operable
/// with AI disabled (§9, "LLM-as-library coupling").
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, budget: GenerationBudget) -> Result<String>;
    async fn analyse(&self, prompt: &str, schema: &Value) -> Result<Value>;
}

/// With AI disabled: `generate` returns the prompt unchanged (instructions
/// degrade to task description + context builder output), `analyse`
/// returns `Value::Null` (blocker suggestions become empty).
pub struct NullLanguageModel;

#[async_trait]
impl LanguageModel for NullLanguageModel {
    async fn generate(&self, prompt: &str, _budget: GenerationBudget) -> Result<String> {
        Ok(prompt.to_owned())
    }

    async fn analyse(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_board_provider_has_no_tasks() {
        let board = NullBoardProvider;
        let tasks = board.list_tasks(&ProjectId::new("p1")).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn null_planner_returns_empty_plan() {
        let planner = NullProjectPlanner;
        let plan = planner.plan("build a thing").await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn null_language_model_echoes_prompt() {
        let model = NullLanguageModel;
        let out = model
            .generate("do the task", GenerationBudget { max_tokens: 100 })
            .await
            .unwrap();
        assert_eq!(out, "do the task");
    }

    #[tokio::test]
    async fn null_language_model_analyse_is_null() {
        let model = NullLanguageModel;
        let out = model.analyse("anything", &Value::Null).await.unwrap();
        assert_eq!(out, Value::Null);
    }

    #[test]
    fn traits_are_object_safe() {
        let _board: Box<dyn BoardProvider> = Box::new(NullBoardProvider);
        let _planner: Box<dyn ProjectPlanner> = Box::new(NullProjectPlanner);
        let _model: Box<dyn LanguageModel> = Box::new(NullLanguageModel);
    }
}
