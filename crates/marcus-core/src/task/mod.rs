//! Task/Project/Agent data model and the per-project task registry.
//!
//! Mirrors the teacher's `state` module: a small set of plain data structs
//! plus a state machine that validates transitions and applies them under
//! a single lock per project (the project-scoped serialisation point
//! required by the concurrency model).

pub mod registry;
pub mod state_machine;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ProjectId, TaskId};

pub use registry::TaskRegistry;
pub use state_machine::TaskStateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// The `priority_weight` term of the assignment score.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.75,
            Priority::Medium => 0.5,
            Priority::Low => 0.25,
        }
    }

    /// The lease-duration priority multiplier.
    pub fn lease_multiplier(self) -> f64 {
        match self {
            Priority::Critical => 0.5,
            Priority::High => 0.75,
            Priority::Medium => 1.0,
            Priority::Low => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: String,
    pub labels: Vec<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub dependencies: Vec<TaskId>,
    pub estimated_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Complexity multiplier for the lease duration, derived from labels.
    pub fn complexity_multiplier(&self) -> f64 {
        const COMPLEXITY: &[(&str, f64)] = &[
            ("simple", 0.5),
            ("complex", 1.5),
            ("research", 2.0),
            ("epic", 3.0),
        ];
        for (label, multiplier) in COMPLEXITY {
            if self.labels.iter().any(|l| l == label) {
                return *multiplier;
            }
        }
        1.0
    }

    /// Tokens used for skill-match and logical-dependency inference:
    /// labels plus lowercased words from the task name.
    pub fn keywords(&self) -> HashSet<String> {
        let mut set: HashSet<String> = self.labels.iter().map(|l| l.to_lowercase()).collect();
        set.extend(
            self.name
                .split_whitespace()
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
                .filter(|w| !w.is_empty()),
        );
        set
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub board_binding: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub skills: HashSet<String>,
    pub status: AgentStatus,
    pub current_task_id: Option<TaskId>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    pub completed_count: u32,
    pub avg_duration_by_label: std::collections::HashMap<String, f64>,
    pub estimation_accuracy: f64,
    pub blockage_rate_by_label: std::collections::HashMap<String, f64>,
    pub improving_labels: Vec<String>,
    pub struggling_labels: Vec<String>,
}

impl AgentProfile {
    pub fn new() -> Self {
        Self {
            estimation_accuracy: 1.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Active,
    Expired,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub assigned_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub renewals: u32,
    pub last_progress_at: DateTime<Utc>,
    pub last_progress_pct: u8,
    pub state: AssignmentState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub affects_tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Api,
    Design,
    Architecture,
    Specification,
    Documentation,
    Reference,
    Temporary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub filename: String,
    pub artifact_type: ArtifactType,
    pub location: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
