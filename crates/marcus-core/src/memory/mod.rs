//! Memory / outcome store: working, episodic, and semantic tiers, plus the
//! pure prediction functions over episodic history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::ids::{AgentId, TaskId};
use crate::task::{Agent, AgentProfile, Task};
use marcus_db::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Success,
    Blocked,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicOutcome {
    pub agent_id: AgentId,
    pub labels: Vec<String>,
    pub planned_h: f64,
    pub actual_h: f64,
    pub result: OutcomeResult,
    pub blocker_category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurationPrediction {
    pub expected_h: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub factors: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockagePrediction {
    pub overall_risk: f64,
    pub by_category: HashMap<String, f64>,
    pub preventive_measures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub improving: Vec<String>,
    pub struggling: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Confidence as a function of sample size: `min(1, n/10)`, floored at 0.2
/// when `n == 0` (priors only).
pub fn confidence_for_sample_size(n: usize) -> f64 {
    if n == 0 {
        0.2
    } else {
        (n as f64 / 10.0).min(1.0)
    }
}

/// `predict_duration`: pure function over a slice of same-agent episodic
/// outcomes for same-label tasks.
pub fn predict_duration(task: &Task, agent: &Agent, profile: &AgentProfile, history: &[EpisodicOutcome]) -> DurationPrediction {
    let baseline = task.estimated_hours.unwrap_or(4.0);
    let mut factors = vec!["baseline estimate".to_string()];

    let same_label: Vec<&EpisodicOutcome> = history
        .iter()
        .filter(|o| o.labels.iter().any(|l| task.labels.contains(l)))
        .collect();

    let ratio = if same_label.is_empty() {
        1.0
    } else {
        let sum_ratio: f64 = same_label
            .iter()
            .map(|o| o.actual_h / o.planned_h.max(0.01))
            .sum();
        factors.push("historical actual/planned ratio for matching labels".to_string());
        sum_ratio / same_label.len() as f64
    };

    let estimation_accuracy = if profile.estimation_accuracy > 0.0 {
        factors.push(format!("agent {} estimation accuracy", agent.name));
        profile.estimation_accuracy
    } else {
        1.0
    };

    let expected_h = baseline * ratio * estimation_accuracy;
    let confidence = confidence_for_sample_size(same_label.len());
    // CI widens as sample size shrinks.
    let spread = expected_h * (1.0 - confidence).max(0.1);

    DurationPrediction {
        expected_h,
        ci_low: (expected_h - spread).max(0.0),
        ci_high: expected_h + spread,
        factors,
        confidence,
    }
}

/// `predict_blockage`: risk is a weighted sum of label-specific blockage
/// rates, boosted by risk keywords and by a dependency's historical
/// blocker.
pub fn predict_blockage(
    task: &Task,
    profile: &AgentProfile,
    any_dependency_had_blocker: bool,
) -> BlockagePrediction {
    const RISK_KEYWORDS: &[(&str, &str)] = &[
        ("auth", "auth"),
        ("integrate", "integration"),
        ("deploy", "dependencies"),
    ];

    let keywords = task.keywords();
    let mut by_category: HashMap<String, f64> = HashMap::new();
    by_category.insert("auth".to_string(), 0.0);
    by_category.insert("integration".to_string(), 0.0);
    by_category.insert("dependencies".to_string(), 0.0);
    by_category.insert("unknown".to_string(), 0.0);

    let mut base_risk = 0.0;
    let mut weight_sum = 0.0;
    for label in &task.labels {
        if let Some(rate) = profile.blockage_rate_by_label.get(label) {
            base_risk += rate;
            weight_sum += 1.0;
        }
    }
    let mut overall_risk = if weight_sum > 0.0 {
        base_risk / weight_sum
    } else {
        0.0
    };

    let mut preventive_measures = Vec::new();
    for (keyword, category) in RISK_KEYWORDS {
        if keywords.contains(*keyword) {
            overall_risk = (overall_risk + 0.3).min(1.0);
            *by_category.entry(category.to_string()).or_insert(0.0) += 0.3;
            preventive_measures.push(format!("review {category} requirements before starting"));
        }
    }

    if any_dependency_had_blocker {
        overall_risk = (overall_risk + 0.2).min(1.0);
        preventive_measures.push("a dependency of this task previously blocked; confirm it is fully resolved".to_string());
    }

    if preventive_measures.is_empty() && overall_risk > 0.0 {
        preventive_measures.push("no specific risk keywords detected; monitor progress reports closely".to_string());
    }

    BlockagePrediction {
        overall_risk,
        by_category,
        preventive_measures,
    }
}

/// `trajectory`: read-only view already assembled in the `AgentProfile`.
pub fn trajectory(profile: &AgentProfile) -> Trajectory {
    let mut recommendations = Vec::new();
    for label in &profile.struggling_labels {
        recommendations.push(format!("pair {label} tasks with a reviewer until accuracy improves"));
    }
    Trajectory {
        improving: profile.improving_labels.clone(),
        struggling: profile.struggling_labels.clone(),
        recommendations,
    }
}

/// Coordinates the three memory tiers over the KV store.
pub struct MemoryStore {
    kv: Arc<dyn KvStore>,
}

impl MemoryStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn record_outcome(&self, task_id: &TaskId, outcome: &EpisodicOutcome) -> Result<()> {
        let key = format!("{task_id}:{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.kv
            .put("task_outcome", &key, serde_json::to_value(outcome)?)
            .await?;
        self.update_profile(&outcome.agent_id, outcome).await
    }

    pub async fn episodic_outcomes(&self) -> Result<Vec<EpisodicOutcome>> {
        let entries = self.kv.scan("task_outcome").await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| serde_json::from_value(e.value).ok())
            .collect())
    }

    pub async fn get_profile(&self, agent_id: &AgentId) -> Result<AgentProfile> {
        match self.kv.get("agent_profile", agent_id.as_str()).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(AgentProfile::new()),
        }
    }

    async fn update_profile(&self, agent_id: &AgentId, outcome: &EpisodicOutcome) -> Result<()> {
        let mut profile = self.get_profile(agent_id).await?;

        match outcome.result {
            OutcomeResult::Success => {
                profile.completed_count += 1;
                for label in &outcome.labels {
                    let entry = profile.avg_duration_by_label.entry(label.clone()).or_insert(outcome.actual_h);
                    *entry = (*entry + outcome.actual_h) / 2.0;
                    if outcome.actual_h <= outcome.planned_h && !profile.improving_labels.contains(label) {
                        profile.improving_labels.push(label.clone());
                    }
                }
                let ratio = outcome.actual_h / outcome.planned_h.max(0.01);
                profile.estimation_accuracy = (profile.estimation_accuracy + (1.0 / ratio).min(2.0)) / 2.0;
            }
            OutcomeResult::Blocked | OutcomeResult::Abandoned => {
                for label in &outcome.labels {
                    let rate = profile.blockage_rate_by_label.entry(label.clone()).or_insert(0.0);
                    *rate = (*rate + 1.0).min(1.0);
                    if !profile.struggling_labels.contains(label) {
                        profile.struggling_labels.push(label.clone());
                    }
                }
            }
        }

        self.kv
            .put("agent_profile", agent_id.as_str(), serde_json::to_value(&profile)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProjectId;
    use crate::task::{AgentStatus, Priority, TaskStatus};
    use chrono::Utc;
    use std::collections::HashSet;

    fn sample_task(labels: &[&str]) -> Task {
        Task {
            id: TaskId::new("t1"),
            project_id: ProjectId::new("p1"),
            name: "Implement OAuth".to_string(),
            description: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            priority: Priority::High,
            status: TaskStatus::Todo,
            dependencies: vec![],
            estimated_hours: Some(4.0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_agent() -> Agent {
        Agent {
            id: AgentId::new("a1"),
            name: "Agent A".to_string(),
            role: "engineer".to_string(),
            skills: HashSet::new(),
            status: AgentStatus::Idle,
            current_task_id: None,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn confidence_floors_at_0_2_with_no_samples() {
        assert_eq!(confidence_for_sample_size(0), 0.2);
    }

    #[test]
    fn confidence_saturates_at_1() {
        assert_eq!(confidence_for_sample_size(20), 1.0);
        assert_eq!(confidence_for_sample_size(5), 0.5);
    }

    #[test]
    fn duration_prediction_uses_baseline_with_no_history() {
        let task = sample_task(&["auth"]);
        let agent = sample_agent();
        let profile = AgentProfile::new();
        let prediction = predict_duration(&task, &agent, &profile, &[]);
        assert!((prediction.expected_h - 4.0).abs() < 1e-9);
        assert_eq!(prediction.confidence, 0.2);
    }

    #[test]
    fn blockage_prediction_flags_auth_keyword() {
        let task = sample_task(&["auth"]);
        let profile = AgentProfile {
            blockage_rate_by_label: HashMap::from([("auth".to_string(), 0.8)]),
            ..AgentProfile::new()
        };
        let prediction = predict_blockage(&task, &profile, false);
        assert!(prediction.overall_risk >= 0.6, "risk was {}", prediction.overall_risk);
        assert!(prediction
            .preventive_measures
            .iter()
            .any(|m| m.contains("auth")));
    }

    #[tokio::test]
    async fn record_outcome_updates_agent_profile() {
        let kv: Arc<dyn KvStore> = Arc::new(marcus_db::MemoryKvStore::new());
        let store = MemoryStore::new(kv);
        let outcome = EpisodicOutcome {
            agent_id: AgentId::new("a1"),
            labels: vec!["backend".to_string()],
            planned_h: 4.0,
            actual_h: 3.0,
            result: OutcomeResult::Success,
            blocker_category: None,
        };
        store.record_outcome(&TaskId::new("t1"), &outcome).await.unwrap();
        let profile = store.get_profile(&AgentId::new("a1")).await.unwrap();
        assert_eq!(profile.completed_count, 1);
    }
}
