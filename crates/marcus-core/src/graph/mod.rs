//! The dependency graph: explicit edges (from the planner/board) overlaid
//! with logical edges inferred from task text, composed into one effective
//! blocks-assignment set.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CoreError, Result};
use crate::ids::TaskId;
use crate::task::Task;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "for", "and", "or", "of", "to", "in", "on", "with", "is", "are",
];

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub confidence_threshold: f64,
    pub max_chain_length: usize,
    pub cascade_decay: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_chain_length: 10,
            cascade_decay: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InferredEdge {
    pub confidence: f64,
}

/// Per-project dependency graph. Tasks hold no pointers to each other; this
/// struct owns every edge, keyed purely by `TaskId`.
pub struct DependencyGraph {
    config: GraphConfig,
    explicit: HashMap<TaskId, HashSet<TaskId>>,
    inferred: HashMap<TaskId, HashMap<TaskId, InferredEdge>>,
}

impl DependencyGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            explicit: HashMap::new(),
            inferred: HashMap::new(),
        }
    }

    /// Insert an explicit edge `from -> to` (`to` depends on `from`... i.e.
    /// `from` must complete before `to`). Rejected if it would create a
    /// cycle (I1).
    pub fn add_explicit_edge(&mut self, predecessor: TaskId, dependent: TaskId) -> Result<()> {
        if predecessor == dependent {
            return Err(CoreError::conflict("task cannot depend on itself"));
        }
        if self.would_cycle(&predecessor, &dependent, true) {
            return Err(CoreError::conflict(format!(
                "edge {predecessor} -> {dependent} would introduce a cycle"
            )));
        }
        self.explicit.entry(predecessor).or_default().insert(dependent);
        Ok(())
    }

    /// Insert an inferred edge; silently dropped if it would cycle.
    pub fn add_inferred_edge(&mut self, predecessor: TaskId, dependent: TaskId, confidence: f64) {
        if predecessor == dependent {
            return;
        }
        if self.would_cycle(&predecessor, &dependent, false) {
            return;
        }
        self.inferred
            .entry(predecessor)
            .or_default()
            .insert(dependent, InferredEdge { confidence });
    }

    /// Recompute every inferred edge for the given task set from scratch,
    /// applying the four ordered rule classes. Idempotent.
    pub fn infer_edges(&mut self, tasks: &[Task]) {
        self.inferred.clear();

        // Rule 1 requires only same-project membership, not text similarity;
        // the other three require a minimum token overlap between names.
        const RULES: &[(&[&str], &[&str], bool)] = &[
            (
                &["setup", "init", "configure", "install"],
                &["implement", "build", "create", "develop", "test", "deploy"],
                true,
            ),
            (
                &["implement", "build", "create", "develop"],
                &["test", "qa", "verify"],
                false,
            ),
            (
                &["test", "qa", "verify"],
                &["deploy", "release", "launch", "production"],
                false,
            ),
            (&["design", "architect"], &["implement", "build"], false),
        );

        for (from_words, to_words, same_project_only) in RULES {
            for predecessor in tasks {
                if !matches_any(predecessor, from_words) {
                    continue;
                }
                for dependent in tasks {
                    if predecessor.id == dependent.id {
                        continue;
                    }
                    if !matches_any(dependent, to_words) {
                        continue;
                    }
                    if *same_project_only {
                        if predecessor.project_id != dependent.project_id {
                            continue;
                        }
                        self.add_inferred_edge(predecessor.id.clone(), dependent.id.clone(), 0.75);
                    } else {
                        let score = text_similarity(predecessor, dependent);
                        if score > 0.0 {
                            self.add_inferred_edge(predecessor.id.clone(), dependent.id.clone(), score);
                        }
                    }
                }
            }
        }
    }

    fn would_cycle(&self, predecessor: &TaskId, dependent: &TaskId, explicit_only: bool) -> bool {
        // Adding predecessor -> dependent cycles iff dependent can already
        // reach predecessor through existing edges.
        let mut stack = vec![dependent.clone()];
        let mut seen: HashSet<TaskId> = HashSet::new();
        while let Some(node) = stack.pop() {
            if &node == predecessor {
                return true;
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(next) = self.explicit.get(&node) {
                stack.extend(next.iter().cloned());
            }
            if !explicit_only {
                if let Some(next) = self.inferred.get(&node) {
                    stack.extend(next.keys().cloned());
                }
            }
        }
        false
    }

    /// The effective blocks-assignment set: explicit edges plus inferred
    /// edges at or above the confidence threshold.
    fn effective_predecessors(&self, task_id: &TaskId) -> HashSet<TaskId> {
        let mut result = HashSet::new();
        for (predecessor, dependents) in &self.explicit {
            if dependents.contains(task_id) {
                result.insert(predecessor.clone());
            }
        }
        for (predecessor, dependents) in &self.inferred {
            if let Some(edge) = dependents.get(task_id) {
                if edge.confidence >= self.config.confidence_threshold {
                    result.insert(predecessor.clone());
                }
            }
        }
        result
    }

    pub fn predecessors_of(&self, task_id: &TaskId) -> Vec<TaskId> {
        self.effective_predecessors(task_id).into_iter().collect()
    }

    pub fn dependents_of(&self, task_id: &TaskId) -> Vec<TaskId> {
        let mut result = HashSet::new();
        if let Some(dependents) = self.explicit.get(task_id) {
            result.extend(dependents.iter().cloned());
        }
        if let Some(dependents) = self.inferred.get(task_id) {
            for (dependent, edge) in dependents {
                if edge.confidence >= self.config.confidence_threshold {
                    result.insert(dependent.clone());
                }
            }
        }
        result.into_iter().collect()
    }

    /// A task is assignable iff every effective predecessor is `done`
    /// (I2); `is_done` is supplied by the caller so this stays pure.
    pub fn is_assignable<F>(&self, task_id: &TaskId, is_done: F) -> bool
    where
        F: Fn(&TaskId) -> bool,
    {
        self.effective_predecessors(task_id)
            .iter()
            .all(|predecessor| is_done(predecessor))
    }

    /// BFS over dependents, multiplying delay by `cascade_decay` per hop.
    /// Monotonic in `delay_h` and visits each node at most once (P8).
    pub fn cascade(&self, task_id: &TaskId, delay_h: f64) -> Vec<(TaskId, f64)> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        visited.insert(task_id.clone());
        let mut queue: VecDeque<(TaskId, f64)> = VecDeque::new();
        queue.push_back((task_id.clone(), delay_h));
        let mut result = Vec::new();

        while let Some((node, current_delay)) = queue.pop_front() {
            for dependent in self.dependents_of(&node) {
                if visited.insert(dependent.clone()) {
                    let propagated = current_delay * self.config.cascade_decay;
                    result.push((dependent.clone(), propagated));
                    queue.push_back((dependent, propagated));
                }
            }
        }
        result
    }
}

fn matches_any(task: &Task, words: &[&str]) -> bool {
    let keywords = task.keywords();
    words.iter().any(|w| keywords.contains(*w))
}

/// Token-overlap scorer: shared content words (stopwords removed) between
/// two tasks' names, scaled into a confidence in (0, 1].
fn text_similarity(a: &Task, b: &Task) -> f64 {
    let tokens = |s: &str| -> HashSet<String> {
        s.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
            .collect()
    };
    let a_tokens = tokens(&a.name);
    let b_tokens = tokens(&b.name);
    let shared = a_tokens.intersection(&b_tokens).count();
    if shared >= 2 {
        0.85
    } else if shared == 1 {
        0.5
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskStatus};
    use crate::ids::ProjectId;
    use chrono::Utc;

    fn task(id: &str, name: &str) -> Task {
        Task {
            id: TaskId::new(id),
            project_id: ProjectId::new("p1"),
            name: name.to_owned(),
            description: String::new(),
            labels: vec![],
            priority: Priority::Medium,
            status: TaskStatus::Todo,
            dependencies: vec![],
            estimated_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_edge_blocks_until_predecessor_done() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph
            .add_explicit_edge(TaskId::new("t1"), TaskId::new("t2"))
            .unwrap();
        assert!(!graph.is_assignable(&TaskId::new("t2"), |_| false));
        assert!(graph.is_assignable(&TaskId::new("t2"), |_| true));
    }

    #[test]
    fn explicit_cycle_is_rejected() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph
            .add_explicit_edge(TaskId::new("t1"), TaskId::new("t2"))
            .unwrap();
        graph
            .add_explicit_edge(TaskId::new("t2"), TaskId::new("t3"))
            .unwrap();
        let err = graph
            .add_explicit_edge(TaskId::new("t3"), TaskId::new("t1"))
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        // the first two edges remain
        assert_eq!(graph.predecessors_of(&TaskId::new("t2")), vec![TaskId::new("t1")]);
    }

    #[test]
    fn inferred_cycle_is_dropped_silently() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph
            .add_explicit_edge(TaskId::new("t1"), TaskId::new("t2"))
            .unwrap();
        graph.add_inferred_edge(TaskId::new("t2"), TaskId::new("t1"), 0.9);
        assert!(graph.predecessors_of(&TaskId::new("t1")).is_empty());
    }

    #[test]
    fn low_confidence_inferred_edge_is_advisory_only() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph.add_inferred_edge(TaskId::new("t1"), TaskId::new("t2"), 0.3);
        assert!(graph.is_assignable(&TaskId::new("t2"), |_| false));
    }

    #[test]
    fn infer_edges_applies_setup_rule() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        let setup = task("t1", "Setup database");
        let implement = task("t2", "Implement users API");
        graph.infer_edges(&[setup.clone(), implement.clone()]);
        assert!(graph.predecessors_of(&implement.id).contains(&setup.id));
    }

    #[test]
    fn infer_edges_requires_shared_words_for_test_rule() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        let implement = task("t1", "Implement users API");
        let test_unrelated = task("t2", "Test billing exports");
        graph.infer_edges(&[implement.clone(), test_unrelated.clone()]);
        assert!(!graph.predecessors_of(&test_unrelated.id).contains(&implement.id));
    }

    #[test]
    fn cascade_decays_per_hop_and_visits_once() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph
            .add_explicit_edge(TaskId::new("t1"), TaskId::new("t2"))
            .unwrap();
        graph
            .add_explicit_edge(TaskId::new("t2"), TaskId::new("t3"))
            .unwrap();
        let result = graph.cascade(&TaskId::new("t1"), 10.0);
        assert_eq!(result.len(), 2);
        let t2_delay = result.iter().find(|(id, _)| *id == TaskId::new("t2")).unwrap().1;
        let t3_delay = result.iter().find(|(id, _)| *id == TaskId::new("t3")).unwrap().1;
        assert!((t2_delay - 8.0).abs() < 1e-9);
        assert!((t3_delay - 6.4).abs() < 1e-9);
    }

    #[test]
    fn cascade_is_monotonic_in_delay() {
        let mut graph = DependencyGraph::new(GraphConfig::default());
        graph
            .add_explicit_edge(TaskId::new("t1"), TaskId::new("t2"))
            .unwrap();
        let small = graph.cascade(&TaskId::new("t1"), 1.0);
        let large = graph.cascade(&TaskId::new("t1"), 5.0);
        assert!(large[0].1 > small[0].1);
    }
}
