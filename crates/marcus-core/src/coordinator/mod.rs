//! The Coordinator API: the operations exposed to clients, orchestrating
//! every other component (event bus, persistence, task registry,
//! dependency graph, memory store, context builder, assignment engine,
//! lease manager).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info_span;
use tracing::Instrument;

use marcus_db::{ConversationLog, KvStore};

use crate::assignment::{self, GraphStats, ScoredCandidate};
use crate::context::{self, TaskContext};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::graph::{DependencyGraph, GraphConfig};
use crate::ids::{AgentId, ProjectId, TaskId};
use crate::interfaces::{BoardProvider, LanguageModel, ProjectPlanner};
use crate::lease::{Clock, LeaseConfig, LeaseManager, LeaseOutcome};
use crate::memory::{self, EpisodicOutcome, MemoryStore, OutcomeResult};
use crate::task::registry::TaskFilter;
use crate::task::{
    Agent, AgentStatus, Artifact, ArtifactType, Assignment, AssignmentState, Decision, Priority,
    Project, Task, TaskRegistry, TaskStatus,
};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_tasks_per_agent: u32,
    pub stale_task_days: i64,
    pub lease: LeaseConfig,
    pub graph: GraphConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_agent: 3,
            stale_task_days: 7,
            lease: LeaseConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);

fn next_event_id() -> String {
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    format!("evt_{seq}_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEnvelope {
    pub task: Task,
    pub instructions: String,
    pub context: TaskContext,
    pub predictions: Predictions,
}

#[derive(Debug, Clone, Serialize)]
pub struct Predictions {
    pub duration: memory::DurationPrediction,
    pub blockage_analysis: memory::BlockagePrediction,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestNextTaskResponse {
    pub task_envelope: Option<TaskEnvelope>,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub assigned_count: usize,
    pub blocked_count: usize,
    pub completion_rate: f64,
    pub active_agents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardHealth {
    pub stale_tasks: Vec<TaskId>,
    pub over_assigned_agents: Vec<AgentId>,
    pub cycles: Vec<String>,
}

/// Per-project graph + lease manager, guarded together since both are
/// scoped to one project.
struct ProjectRuntime {
    graph: DependencyGraph,
    lease: Arc<LeaseManager>,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<TaskRegistry>,
    memory: Arc<MemoryStore>,
    events: Arc<EventBus>,
    conversation_log: Arc<ConversationLog>,
    kv: Arc<dyn KvStore>,
    board: Arc<dyn BoardProvider>,
    planner: Arc<dyn ProjectPlanner>,
    llm: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
    runtimes: RwLock<HashMap<ProjectId, ProjectRuntime>>,
    assignments: RwLock<HashMap<TaskId, Assignment>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<TaskRegistry>,
        kv: Arc<dyn KvStore>,
        events: Arc<EventBus>,
        conversation_log: Arc<ConversationLog>,
        board: Arc<dyn BoardProvider>,
        planner: Arc<dyn ProjectPlanner>,
        llm: Arc<dyn LanguageModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            memory: Arc::new(MemoryStore::new(kv.clone())),
            events,
            conversation_log,
            kv,
            board,
            planner,
            llm,
            clock,
            runtimes: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
        }
    }

    async fn emit(&self, event_type: &str, data: serde_json::Value) {
        let event_id = next_event_id();
        let record = json!({
            "event_id": event_id,
            "timestamp": Utc::now(),
            "event_type": event_type,
            "source": "coordinator",
            "data": data,
        });
        if let Err(err) = self.conversation_log.append(&record).await {
            tracing::error!(error = %err, "evt_not_persisted");
        }
        self.events.publish(Event::new(event_type, data)).await;
    }

    async fn runtime_for(&self, project_id: &ProjectId) -> Result<()> {
        let mut runtimes = self.runtimes.write().await;
        if !runtimes.contains_key(project_id) {
            let lease = Arc::new(LeaseManager::new(
                self.config.lease.clone(),
                self.clock.clone(),
                self.events.clone(),
            ));
            runtimes.insert(
                project_id.clone(),
                ProjectRuntime {
                    graph: DependencyGraph::new(self.config.graph.clone()),
                    lease,
                },
            );
        }
        Ok(())
    }

    pub async fn register_project(&self, project: Project) -> Result<()> {
        self.runtime_for(&project.id).await?;
        self.registry.register_project(project).await;
        Ok(())
    }

    /// `register_agent`: idempotent, re-registration updates `skills` and
    /// resets `status=idle`.
    pub async fn register_agent(&self, id: AgentId, name: String, role: String, skills: Vec<String>) -> Result<()> {
        let agent = Agent {
            id: id.clone(),
            name,
            role,
            skills: skills.into_iter().collect(),
            status: AgentStatus::Idle,
            current_task_id: None,
            registered_at: Utc::now(),
        };
        self.registry.register_agent(agent).await;
        self.emit("agent_registered", json!({ "agent_id": id.to_string() })).await;
        Ok(())
    }

    async fn agent_active_assignment_count(&self, agent_id: &AgentId) -> u32 {
        self.assignments
            .read()
            .await
            .values()
            .filter(|a| &a.agent_id == agent_id && a.state == AssignmentState::Active)
            .count() as u32
    }

    /// `request_next_task`: I→G→D,E,F→C→B in the spec's data-flow diagram.
    pub async fn request_next_task(&self, agent_id: &AgentId, cancel: CancellationToken) -> Result<RequestNextTaskResponse> {
        let span = info_span!("request_next_task", agent_id = %agent_id);
        async {
            let agent = self.registry.get_agent(agent_id).await?;

            let project_id = self
                .registry
                .active_project()
                .await
                .ok_or_else(|| CoreError::not_found("no active project"))?;

            if self.agent_active_assignment_count(agent_id).await >= self.config.max_tasks_per_agent {
                return Ok(RequestNextTaskResponse {
                    task_envelope: None,
                    retry_after_seconds: Some(assignment::retry_after_seconds(1)),
                });
            }

            let all_tasks = self.registry.list_tasks(&project_id, &TaskFilter::default()).await?;
            let status_by_id: HashMap<TaskId, TaskStatus> =
                all_tasks.iter().map(|t| (t.id.clone(), t.status)).collect();
            let todo: Vec<&Task> = all_tasks.iter().filter(|t| t.status == TaskStatus::Todo).collect();

            let assignments = self.assignments.read().await;
            let runtimes = self.runtimes.read().await;
            let runtime = runtimes
                .get(&project_id)
                .ok_or_else(|| CoreError::internal("project runtime missing"))?;

            let frontier: Vec<&Task> = todo
                .iter()
                .filter(|t| {
                    runtime.graph.is_assignable(&t.id, |predecessor| {
                        status_by_id.get(predecessor) == Some(&TaskStatus::Done)
                    }) && !assignments.contains_key(&t.id)
                })
                .copied()
                .collect();

            if frontier.is_empty() {
                let total = all_tasks.len();
                let done = all_tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
                drop(assignments);
                drop(runtimes);
                if done < total {
                    return Ok(RequestNextTaskResponse {
                        task_envelope: None,
                        retry_after_seconds: Some(assignment::retry_after_seconds(1)),
                    });
                }
                return Ok(RequestNextTaskResponse { task_envelope: None, retry_after_seconds: None });
            }

            let dependent_counts: Vec<usize> = frontier
                .iter()
                .map(|t| runtime.graph.dependents_of(&t.id).len())
                .collect();
            let max_dependents = assignment::max_dependents_in_project(&dependent_counts);

            let profile = self.memory.get_profile(agent_id).await?;
            let history = self.memory.episodic_outcomes().await?;

            let mut candidates = Vec::new();
            for task in &frontier {
                let direct_dependents = runtime.graph.dependents_of(&task.id).len();
                let stats = GraphStats {
                    direct_dependents,
                    max_dependents_in_project: max_dependents,
                };
                let recent: Vec<bool> = history
                    .iter()
                    .filter(|o| o.agent_id == *agent_id && o.labels.iter().any(|l| task.labels.contains(l)))
                    .map(|o| o.result == OutcomeResult::Success)
                    .collect();
                let preference = assignment::agent_preference(task, &recent);
                let unblocking_value = if max_dependents == 0 {
                    0.0
                } else {
                    direct_dependents as f64 / max_dependents as f64
                };
                candidates.push(ScoredCandidate {
                    task: (*task).clone(),
                    score: assignment::score(task, &agent, stats, preference),
                    unblocking_value,
                });
            }
            drop(assignments);
            drop(runtimes);

            let Some(winner) = assignment::pick_best(candidates) else {
                return Ok(RequestNextTaskResponse { task_envelope: None, retry_after_seconds: None });
            };
            let task = winner.task;

            if cancel.is_cancelled() {
                return Err(CoreError::internal("request cancelled before commit"));
            }

            let envelope = self.commit_assignment(&project_id, task, agent, &profile, &history).await?;
            Ok(RequestNextTaskResponse { task_envelope: Some(envelope), retry_after_seconds: None })
        }
        .instrument(span)
        .await
    }

    async fn commit_assignment(
        &self,
        project_id: &ProjectId,
        task: Task,
        agent: Agent,
        profile: &crate::task::AgentProfile,
        history: &[EpisodicOutcome],
    ) -> Result<TaskEnvelope> {
        let updated = self.registry.update_status(project_id, &task.id, TaskStatus::InProgress).await?;

        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes.get_mut(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
        let lease_expires_at = runtime.lease.start(&updated, agent.id.clone()).await;
        let dependents: Vec<Task> = {
            let ids = runtime.graph.dependents_of(&task.id);
            let mut out = Vec::new();
            for id in ids {
                if let Ok(t) = self.registry.get_task(project_id, &id).await {
                    out.push(t);
                }
            }
            out
        };
        drop(runtimes);

        let now = Utc::now();
        let assignment = Assignment {
            task_id: task.id.clone(),
            agent_id: agent.id.clone(),
            assigned_at: now,
            lease_expires_at,
            renewals: 0,
            last_progress_at: now,
            last_progress_pct: 0,
            state: AssignmentState::Active,
        };
        self.assignments.write().await.insert(task.id.clone(), assignment.clone());
        self.kv
            .put("assignments", task.id.as_str(), serde_json::to_value(&assignment)?)
            .await?;

        self.registry
            .update_agent_status(&agent.id, AgentStatus::Working, Some(task.id.clone()))
            .await?;

        let previously_attempted = self
            .memory
            .episodic_outcomes()
            .await?
            .iter()
            .any(|o| o.result != OutcomeResult::Success);

        let predecessor_ids = {
            let runtimes = self.runtimes.read().await;
            let runtime = runtimes.get(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
            runtime.graph.predecessors_of(&task.id)
        };
        let done_predecessors = self.done_predecessors(project_id, predecessor_ids).await?;
        let artifacts = self.scan_artifacts(&done_predecessors).await?;
        let decisions = self.scan_decisions().await?;
        let context = context::build_context(&updated, artifacts, decisions, &dependents);
        let instructions_prompt = context::build_instructions(&updated, &context, previously_attempted);
        let instructions = self
            .llm
            .generate(&instructions_prompt, crate::interfaces::GenerationBudget { max_tokens: 2000 })
            .await
            .unwrap_or(instructions_prompt);

        let duration = memory::predict_duration(&updated, &agent, profile, history);
        let any_dependency_blocked = history.iter().any(|o| o.result != OutcomeResult::Success);
        let blockage_analysis = memory::predict_blockage(&updated, profile, any_dependency_blocked);

        self.emit(
            "task_assigned",
            json!({
                "task_id": updated.id.to_string(),
                "agent_id": agent.id.to_string(),
            }),
        )
        .await;

        Ok(TaskEnvelope {
            task: updated,
            instructions,
            context,
            predictions: Predictions { duration, blockage_analysis },
        })
    }

    /// `report_task_progress`: validates I4 (non-decreasing, clamped),
    /// ownership, and non-terminal state.
    pub async fn report_task_progress(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        status: &str,
        progress: u8,
        _message: &str,
    ) -> Result<()> {
        let progress = progress.min(100);
        let mut assignments = self.assignments.write().await;
        let assignment = assignments
            .get_mut(task_id)
            .ok_or_else(|| CoreError::not_found(format!("no assignment for task {task_id}")))?;

        if &assignment.agent_id != agent_id {
            return Err(CoreError::conflict("agent does not own this assignment"));
        }
        if assignment.state != AssignmentState::Active {
            return Err(CoreError::invalid_transition("assignment is not active"));
        }
        if progress < assignment.last_progress_pct {
            return Err(CoreError::invalid_transition("progress must be non-decreasing"));
        }

        let (project_id, task) = self.registry.find_task(task_id).await?;
        assignment.last_progress_pct = progress;
        assignment.last_progress_at = Utc::now();

        if status == "completed" && progress == 100 {
            assignment.state = AssignmentState::Completed;
            let assignment_snapshot = assignment.clone();
            drop(assignments);

            self.registry.update_status(&project_id, task_id, TaskStatus::Done).await?;
            self.registry.update_agent_status(agent_id, AgentStatus::Idle, None).await?;

            let mut runtimes = self.runtimes.write().await;
            if let Some(runtime) = runtimes.get_mut(&project_id) {
                runtime.lease.cancel(task_id).await;
            }
            drop(runtimes);

            let planned_h = task.estimated_hours.unwrap_or(4.0);
            let actual_h = (Utc::now() - assignment_snapshot.assigned_at).num_minutes() as f64 / 60.0;
            self.memory
                .record_outcome(
                    task_id,
                    &EpisodicOutcome {
                        agent_id: agent_id.clone(),
                        labels: task.labels.clone(),
                        planned_h,
                        actual_h: actual_h.max(0.01),
                        result: OutcomeResult::Success,
                        blocker_category: None,
                    },
                )
                .await?;

            self.kv.delete("assignments", task_id.as_str()).await?;
            self.emit("task_completed", json!({ "task_id": task_id.to_string() })).await;
        } else if status == "blocked" {
            assignment.state = AssignmentState::Abandoned;
            drop(assignments);

            self.registry.update_status(&project_id, task_id, TaskStatus::Blocked).await?;
            self.registry.update_agent_status(agent_id, AgentStatus::Idle, None).await?;

            let mut runtimes = self.runtimes.write().await;
            if let Some(runtime) = runtimes.get_mut(&project_id) {
                runtime.lease.cancel(task_id).await;
            }
            drop(runtimes);

            self.kv.delete("assignments", task_id.as_str()).await?;
            self.emit("task_blocked", json!({ "task_id": task_id.to_string() })).await;
        } else {
            let snapshot = assignment.clone();
            drop(assignments);
            let mut runtimes = self.runtimes.write().await;
            if let Some(runtime) = runtimes.get_mut(&project_id) {
                runtime.lease.renew(task_id).await;
            }
            drop(runtimes);
            self.kv.put("assignments", task_id.as_str(), serde_json::to_value(&snapshot)?).await?;
            self.emit(
                "task_progress",
                json!({ "task_id": task_id.to_string(), "progress": progress }),
            )
            .await;
        }

        Ok(())
    }

    /// `report_blocker`: persists a Decision row, invokes the LLM for
    /// suggestions, never auto-transitions the task.
    pub async fn report_blocker(&self, agent_id: &AgentId, task_id: &TaskId, description: &str) -> Result<Vec<String>> {
        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            text: format!("blocker: {description}"),
            created_at: Utc::now(),
            affects_tasks: vec![task_id.clone()],
        };
        self.kv.put("decisions", &decision.id, serde_json::to_value(&decision)?).await?;

        let schema = json!({ "type": "object", "properties": { "suggestions": { "type": "array" } } });
        let analysis = self
            .llm
            .analyse(&format!("agent blocked on {task_id}: {description}"), &schema)
            .await
            .unwrap_or(serde_json::Value::Null);

        let suggestions: Vec<String> = analysis
            .get("suggestions")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|s| s.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();

        self.emit(
            "blocker_reported",
            json!({ "task_id": task_id.to_string(), "agent_id": agent_id.to_string() }),
        )
        .await;

        Ok(suggestions)
    }

    /// Scans the `artifacts` KV collection for rows belonging to any of
    /// `task_ids` (used with the completed-predecessor set, per the
    /// Context Builder's upstream-artifact rule).
    async fn scan_artifacts(&self, task_ids: &[TaskId]) -> Result<Vec<Artifact>> {
        let entries = self.kv.scan("artifacts").await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| serde_json::from_value::<Artifact>(e.value).ok())
            .filter(|a| task_ids.contains(&a.task_id))
            .collect())
    }

    /// Predecessors of `task_id` whose status is `Done`, per the
    /// Context Builder's upstream-artifact/decision scoping rule.
    async fn done_predecessors(&self, project_id: &ProjectId, runtime_predecessors: Vec<TaskId>) -> Result<Vec<TaskId>> {
        let mut done = Vec::new();
        for id in runtime_predecessors {
            if let Ok(task) = self.registry.get_task(project_id, &id).await {
                if task.status == TaskStatus::Done {
                    done.push(id);
                }
            }
        }
        Ok(done)
    }

    async fn scan_decisions(&self) -> Result<Vec<Decision>> {
        let entries = self.kv.scan("decisions").await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| serde_json::from_value::<Decision>(e.value).ok())
            .collect())
    }

    pub async fn get_task_context(&self, project_id: &ProjectId, task_id: &TaskId) -> Result<TaskContext> {
        let task = self.registry.get_task(project_id, task_id).await?;
        let runtimes = self.runtimes.read().await;
        let runtime = runtimes.get(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
        let mut dependents = Vec::new();
        for id in runtime.graph.dependents_of(task_id) {
            if let Ok(t) = self.registry.get_task(project_id, &id).await {
                dependents.push(t);
            }
        }
        let predecessor_ids = runtime.graph.predecessors_of(task_id);
        drop(runtimes);
        let done_predecessors = self.done_predecessors(project_id, predecessor_ids).await?;
        let artifacts = self.scan_artifacts(&done_predecessors).await?;
        let decisions = self.scan_decisions().await?;
        Ok(context::build_context(&task, artifacts, decisions, &dependents))
    }

    /// `log_decision`: attaches `affects_tasks` to direct dependents only
    /// (per the binding decision on the open question), unless the text
    /// names specific tasks.
    pub async fn log_decision(&self, project_id: &ProjectId, task_id: &TaskId, agent_id: &AgentId, text: &str) -> Result<()> {
        let runtimes = self.runtimes.read().await;
        let runtime = runtimes.get(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
        let direct_dependents = runtime.graph.dependents_of(task_id);
        drop(runtimes);

        let project_tasks = self.registry.list_tasks(project_id, &TaskFilter::default()).await?;
        let affects_tasks = context::affected_tasks_for_decision(text, &project_tasks, &direct_dependents);

        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            text: text.to_owned(),
            created_at: Utc::now(),
            affects_tasks,
        };
        self.kv.put("decisions", &decision.id, serde_json::to_value(&decision)?).await?;
        self.emit("decision_logged", json!({ "task_id": task_id.to_string() })).await;
        Ok(())
    }

    /// `log_artifact`: metadata only; content storage is a pluggable sink
    /// external to the core.
    pub async fn log_artifact(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        filename: &str,
        artifact_type: ArtifactType,
        description: &str,
        location: Option<String>,
    ) -> Result<String> {
        let location = location.unwrap_or_else(|| format!("artifacts/{task_id}/{filename}"));
        let artifact = Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            filename: filename.to_owned(),
            artifact_type,
            location: location.clone(),
            description: description.to_owned(),
            created_at: Utc::now(),
        };
        self.kv.put("artifacts", &artifact.id, serde_json::to_value(&artifact)?).await?;
        self.emit("artifact_logged", json!({ "task_id": task_id.to_string() })).await;
        Ok(location)
    }

    pub async fn get_project_status(&self, project_id: &ProjectId) -> Result<ProjectStatus> {
        let tasks = self.registry.list_tasks(project_id, &TaskFilter::default()).await?;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for task in &tasks {
            *by_status.entry(format!("{:?}", task.status)).or_insert(0) += 1;
        }
        let total = tasks.len();
        let done = by_status.get("Done").copied().unwrap_or(0);
        let blocked = by_status.get("Blocked").copied().unwrap_or(0);
        let assigned = self.assignments.read().await.values().filter(|a| a.state == AssignmentState::Active).count();
        let active_agents = self
            .registry
            .list_agents()
            .await
            .into_iter()
            .filter(|a| a.status == AgentStatus::Working)
            .count();

        Ok(ProjectStatus {
            total,
            by_status,
            assigned_count: assigned,
            blocked_count: blocked,
            completion_rate: if total == 0 { 0.0 } else { done as f64 / total as f64 },
            active_agents,
        })
    }

    /// `check_board_health`: stale tasks past `stale_task_days`,
    /// over-assigned agents, and any cycle markers (there are none by
    /// construction since explicit edges reject cycles at insertion, but
    /// the check is kept for operator visibility into near-misses).
    pub async fn check_board_health(&self, project_id: &ProjectId) -> Result<BoardHealth> {
        let tasks = self.registry.list_tasks(project_id, &TaskFilter::default()).await?;
        let threshold = Utc::now() - chrono::Duration::days(self.config.stale_task_days);
        let stale_tasks: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Done && t.updated_at < threshold)
            .map(|t| t.id.clone())
            .collect();

        let agents = self.registry.list_agents().await;
        let mut over_assigned = Vec::new();
        for agent in &agents {
            if self.agent_active_assignment_count(&agent.id).await > self.config.max_tasks_per_agent {
                over_assigned.push(agent.id.clone());
            }
        }

        Ok(BoardHealth {
            stale_tasks,
            over_assigned_agents: over_assigned,
            cycles: Vec::new(),
        })
    }

    /// Sweep every active assignment in a project against its lease,
    /// recycling expired ones back to `todo` and clearing the agent. Meant
    /// to be called periodically by the server's monitoring loop (spec
    /// §6, `monitoring_interval`).
    pub async fn sweep_expired_leases(&self, project_id: &ProjectId) -> Result<Vec<TaskId>> {
        let active: Vec<Assignment> = {
            let assignments = self.assignments.read().await;
            assignments
                .values()
                .filter(|a| a.state == AssignmentState::Active)
                .cloned()
                .collect()
        };

        let mut recycled = Vec::new();
        for assignment in active {
            let Ok(task) = self.registry.get_task(project_id, &assignment.task_id).await else {
                continue;
            };

            let outcome = {
                let runtimes = self.runtimes.read().await;
                let Some(runtime) = runtimes.get(project_id) else { continue };
                runtime.lease.evaluate(&assignment.task_id, assignment.last_progress_at).await
            };

            if outcome != LeaseOutcome::Expired {
                continue;
            }

            self.registry.update_status(project_id, &task.id, TaskStatus::Todo).await?;
            self.registry
                .update_agent_status(&assignment.agent_id, AgentStatus::Idle, None)
                .await?;

            {
                let mut runtimes = self.runtimes.write().await;
                if let Some(runtime) = runtimes.get_mut(project_id) {
                    runtime.lease.cancel(&task.id).await;
                }
            }
            self.assignments.write().await.remove(&task.id);
            self.kv.delete("assignments", task.id.as_str()).await?;

            self.memory
                .record_outcome(
                    &task.id,
                    &memory::EpisodicOutcome {
                        agent_id: assignment.agent_id.clone(),
                        labels: task.labels.clone(),
                        planned_h: task.estimated_hours.unwrap_or(4.0),
                        actual_h: (Utc::now() - assignment.assigned_at).num_minutes() as f64 / 60.0,
                        result: OutcomeResult::Abandoned,
                        blocker_category: Some("lease_expired".to_string()),
                    },
                )
                .await?;

            self.emit(
                "lease_expired",
                json!({ "task_id": task.id.to_string(), "agent_id": assignment.agent_id.to_string() }),
            )
            .await;
            recycled.push(task.id);
        }

        Ok(recycled)
    }

    /// Recompute logical edges for a project after the task set changes
    /// (e.g. after planning or a board sync).
    pub async fn refresh_inferred_edges(&self, project_id: &ProjectId) -> Result<()> {
        let tasks = self.registry.list_tasks(project_id, &TaskFilter::default()).await?;
        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes.get_mut(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
        runtime.graph.infer_edges(&tasks);
        Ok(())
    }

    /// Insert an explicit dependency edge (planner/board), rejecting
    /// cycles (I1).
    pub async fn add_dependency(&self, project_id: &ProjectId, predecessor: TaskId, dependent: TaskId) -> Result<()> {
        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes.get_mut(project_id).ok_or_else(|| CoreError::internal("project runtime missing"))?;
        runtime.graph.add_explicit_edge(predecessor, dependent)
    }

    pub fn board(&self) -> &Arc<dyn BoardProvider> {
        &self.board
    }

    pub fn planner(&self) -> &Arc<dyn ProjectPlanner> {
        &self.planner
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.emit("system_shutdown", json!({})).await;
        Ok(())
    }
}
