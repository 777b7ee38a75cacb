use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::state_machine::TaskStateMachine;
use super::{Agent, AgentStatus, Project, Task, TaskStatus};
use crate::error::{CoreError, Result};
use crate::ids::{AgentId, ProjectId, TaskId};

/// Per-project task state, guarded by one lock.
///
/// This is the single logical serialisation point the concurrency model
/// requires: every mutation to a project's tasks takes this lock, never a
/// process-wide one, so unrelated projects never contend.
struct ProjectState {
    project: Project,
    tasks: HashMap<TaskId, Task>,
}

/// Holds every known project's tasks and every known agent.
///
/// Keyed by `(project_id, task_id)` as the data model specifies; the outer
/// map is a short-lived lock only for inserting/removing whole projects,
/// the inner per-project lock is what serialises task mutation.
pub struct TaskRegistry {
    projects: RwLock<HashMap<ProjectId, Arc<RwLock<ProjectState>>>>,
    agents: RwLock<HashMap<AgentId, Agent>>,
    active_project: RwLock<Option<ProjectId>>,
}

/// Filter predicate for `list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub label: Option<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !task.labels.iter().any(|l| l == label) {
                return false;
            }
        }
        true
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            active_project: RwLock::new(None),
        }
    }

    pub async fn register_project(&self, project: Project) {
        let mut projects = self.projects.write().await;
        let is_first = projects.is_empty();
        let id = project.id.clone();
        projects.insert(
            id.clone(),
            Arc::new(RwLock::new(ProjectState {
                project,
                tasks: HashMap::new(),
            })),
        );
        drop(projects);
        if is_first {
            *self.active_project.write().await = Some(id);
        }
    }

    pub async fn remove_project(&self, id: &ProjectId) {
        self.projects.write().await.remove(id);
        let mut active = self.active_project.write().await;
        if active.as_ref() == Some(id) {
            *active = None;
        }
    }

    pub async fn select_active_project(&self, id: ProjectId) -> Result<()> {
        let projects = self.projects.read().await;
        if !projects.contains_key(&id) {
            return Err(CoreError::not_found(format!("project {id} not registered")));
        }
        drop(projects);
        *self.active_project.write().await = Some(id);
        Ok(())
    }

    pub async fn active_project(&self) -> Option<ProjectId> {
        self.active_project.read().await.clone()
    }

    async fn project_state(&self, project_id: &ProjectId) -> Result<Arc<RwLock<ProjectState>>> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("project {project_id} not registered")))
    }

    pub async fn add_tasks(&self, project_id: &ProjectId, tasks: Vec<Task>) -> Result<()> {
        let state = self.project_state(project_id).await?;
        let mut state = state.write().await;
        for task in tasks {
            state.tasks.insert(task.id.clone(), task);
        }
        Ok(())
    }

    pub async fn get_task(&self, project_id: &ProjectId, task_id: &TaskId) -> Result<Task> {
        let state = self.project_state(project_id).await?;
        let state = state.read().await;
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("task {task_id} not found")))
    }

    /// Find a task by id without knowing its project ahead of time.
    pub async fn find_task(&self, task_id: &TaskId) -> Result<(ProjectId, Task)> {
        let projects = self.projects.read().await;
        for (project_id, state) in projects.iter() {
            let state = state.read().await;
            if let Some(task) = state.tasks.get(task_id) {
                return Ok((project_id.clone(), task.clone()));
            }
        }
        Err(CoreError::not_found(format!("task {task_id} not found")))
    }

    pub async fn list_tasks(&self, project_id: &ProjectId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let state = self.project_state(project_id).await?;
        let state = state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    /// Apply a validated status transition to a task, bumping `updated_at`.
    pub async fn update_status(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        new_status: TaskStatus,
    ) -> Result<Task> {
        let state = self.project_state(project_id).await?;
        let mut state = state.write().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::not_found(format!("task {task_id} not found")))?;

        TaskStateMachine::validate(task.status, new_status)?;
        task.status = new_status;
        task.updated_at = chrono::Utc::now();
        Ok(task.clone())
    }

    pub async fn register_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn get_agent(&self, id: &AgentId) -> Result<Agent> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("agent {id} not found")))
    }

    pub async fn update_agent_status(
        &self,
        id: &AgentId,
        status: AgentStatus,
        current_task_id: Option<TaskId>,
    ) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("agent {id} not found")))?;
        agent.status = status;
        agent.current_task_id = current_task_id;
        Ok(())
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    pub async fn get_project(&self, project_id: &ProjectId) -> Result<Project> {
        let state = self.project_state(project_id).await?;
        Ok(state.read().await.project.clone())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use chrono::Utc;

    fn sample_task(id: &str, project: &ProjectId, status: TaskStatus) -> Task {
        Task {
            id: TaskId::new(id),
            project_id: project.clone(),
            name: format!("Task {id}"),
            description: String::new(),
            labels: vec![],
            priority: Priority::Medium,
            status,
            dependencies: vec![],
            estimated_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_registered_project_becomes_active() {
        let registry = TaskRegistry::new();
        let project = Project {
            id: ProjectId::new("p1"),
            name: "P1".into(),
            board_binding: None,
            created_at: Utc::now(),
        };
        registry.register_project(project.clone()).await;
        assert_eq!(registry.active_project().await, Some(project.id));
    }

    #[tokio::test]
    async fn add_and_get_task_round_trips() {
        let registry = TaskRegistry::new();
        let project_id = ProjectId::new("p1");
        registry
            .register_project(Project {
                id: project_id.clone(),
                name: "P1".into(),
                board_binding: None,
                created_at: Utc::now(),
            })
            .await;

        let task = sample_task("t1", &project_id, TaskStatus::Todo);
        registry.add_tasks(&project_id, vec![task.clone()]).await.unwrap();

        let fetched = registry.get_task(&project_id, &task.id).await.unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let registry = TaskRegistry::new();
        let project_id = ProjectId::new("p1");
        registry
            .register_project(Project {
                id: project_id.clone(),
                name: "P1".into(),
                board_binding: None,
                created_at: Utc::now(),
            })
            .await;
        let task = sample_task("t1", &project_id, TaskStatus::Done);
        registry.add_tasks(&project_id, vec![task.clone()]).await.unwrap();

        let err = registry
            .update_status(&project_id, &task.id, TaskStatus::Todo)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn unregistered_project_is_not_found() {
        let registry = TaskRegistry::new();
        let err = registry
            .get_task(&ProjectId::new("ghost"), &TaskId::new("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn find_task_locates_task_across_projects() {
        let registry = TaskRegistry::new();
        let project_id = ProjectId::new("p1");
        registry
            .register_project(Project {
                id: project_id.clone(),
                name: "P1".into(),
                board_binding: None,
                created_at: Utc::now(),
            })
            .await;
        let task = sample_task("t1", &project_id, TaskStatus::Todo);
        registry.add_tasks(&project_id, vec![task.clone()]).await.unwrap();

        let (found_project, found_task) = registry.find_task(&task.id).await.unwrap();
        assert_eq!(found_project, project_id);
        assert_eq!(found_task.id, task.id);
    }
}
