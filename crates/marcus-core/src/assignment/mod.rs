//! The assignment engine: frontier computation, the weighted scoring
//! function, tie-break order, and backoff when nothing is assignable.

use rand::Rng;

use crate::task::{Agent, Task};

/// Graph-derived statistics the scoring function needs, computed once per
/// `request_next_task` call rather than per-candidate.
#[derive(Debug, Clone, Copy)]
pub struct GraphStats {
    pub direct_dependents: usize,
    pub max_dependents_in_project: usize,
}

/// `score(task, agent) = 0.40*skill_match + 0.30*priority_weight + 0.20*unblocking_value + 0.10*agent_preference`
pub fn score(task: &Task, agent: &Agent, graph_stats: GraphStats, agent_preference: f64) -> f64 {
    let skill_match = jaccard(&agent.skills, &task.keywords());
    let priority_weight = task.priority.weight();
    let unblocking_value = if graph_stats.max_dependents_in_project == 0 {
        0.0
    } else {
        graph_stats.direct_dependents as f64 / graph_stats.max_dependents_in_project as f64
    };

    0.40 * skill_match + 0.30 * priority_weight + 0.20 * unblocking_value + 0.10 * agent_preference
}

fn jaccard(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Exponentially-weighted recency of successful same-label completions:
/// most recent outcomes are weighted highest.
pub fn agent_preference(task: &Task, recent_same_label_successes: &[bool]) -> f64 {
    if recent_same_label_successes.is_empty() {
        return 0.0;
    }
    const DECAY: f64 = 0.7;
    let mut weight = 1.0;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    // iterate most-recent-first
    for &success in recent_same_label_successes.iter().rev() {
        if success {
            weighted_sum += weight;
        }
        weight_total += weight;
        weight *= DECAY;
    }
    let _ = task;
    if weight_total == 0.0 {
        0.0
    } else {
        (weighted_sum / weight_total).min(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub task: Task,
    pub score: f64,
    pub unblocking_value: f64,
}

/// Pick the highest-scoring candidate, breaking ties by higher
/// `unblocking_value`, then earlier `created_at`, then lexicographic
/// `task_id` (spec §4.7 step 5).
pub fn pick_best(mut candidates: Vec<ScoredCandidate>) -> Option<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then_with(|| b.unblocking_value.partial_cmp(&a.unblocking_value).unwrap())
            .then_with(|| a.task.created_at.cmp(&b.task.created_at))
            .then_with(|| a.task.id.as_str().cmp(b.task.id.as_str()))
    });
    candidates.into_iter().next()
}

/// `retry_after_seconds = min(60, base_backoff * jitter)` for an empty
/// frontier with outstanding work remaining.
pub fn retry_after_seconds(attempt: u32) -> u64 {
    let base_backoff = 2u64.saturating_pow(attempt.min(6)).max(1);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    ((base_backoff as f64 * jitter).min(60.0)) as u64
}

/// Dependents-in-project bound used to normalise `unblocking_value`.
pub fn max_dependents_in_project(direct_dependent_counts: &[usize]) -> usize {
    direct_dependent_counts.iter().copied().max().unwrap_or(0)
}
