//! Context builder: assembles upstream artifacts/decisions and downstream
//! interface needs for a candidate task, plus the plain-text instruction
//! document used when no `LanguageModel` is configured.
//!
//! Follows the teacher's `plan::materialize_task` style: a plain `String`
//! builder producing a standalone document, not a templating engine.

use serde::Serialize;

use crate::ids::TaskId;
use crate::task::{Artifact, Decision, Task};

const MAX_PER_ARTIFACT_TYPE: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub upstream_artifacts: Vec<Artifact>,
    pub upstream_decisions: Vec<Decision>,
    pub dependent_needs: Vec<String>,
}

/// Build the context for `task`, given its upstream artifacts/decisions
/// and its dependents (for the downstream-needs inference).
pub fn build_context(
    task: &Task,
    upstream_artifacts: Vec<Artifact>,
    upstream_decisions: Vec<Decision>,
    dependents: &[Task],
) -> TaskContext {
    TaskContext {
        upstream_artifacts: bound_per_type(upstream_artifacts),
        upstream_decisions: upstream_decisions
            .into_iter()
            .filter(|d| d.affects_tasks.contains(&task.id))
            .collect(),
        dependent_needs: dependents.iter().map(|d| dependent_need(d)).collect(),
    }
}

fn bound_per_type(mut artifacts: Vec<Artifact>) -> Vec<Artifact> {
    artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut counts: std::collections::HashMap<crate::task::ArtifactType, usize> = std::collections::HashMap::new();
    artifacts
        .into_iter()
        .filter(|a| {
            let count = counts.entry(a.artifact_type).or_insert(0);
            *count += 1;
            *count <= MAX_PER_ARTIFACT_TYPE
        })
        .collect()
}

fn dependent_need(dependent: &Task) -> String {
    let keywords = dependent.keywords();
    if keywords.contains("test") || keywords.contains("qa") {
        "needs documented endpoints with example requests/responses".to_string()
    } else if keywords.contains("ui") || keywords.contains("frontend") {
        "needs stable API contract + error shapes".to_string()
    } else if keywords.contains("deploy") || keywords.contains("release") {
        "needs passing tests + runbook".to_string()
    } else {
        "needs clear interface definition".to_string()
    }
}

/// Build a standalone markdown instruction document for a task, usable
/// with or without a `LanguageModel`: the description plus whatever
/// context was gathered.
pub fn build_instructions(task: &Task, context: &TaskContext, previously_attempted: bool) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# {}\n\n", task.name));
    doc.push_str(&task.description);
    doc.push_str("\n\n");

    if previously_attempted {
        doc.push_str("> previously attempted: a prior assignment on this task expired without completion.\n\n");
    }

    if !context.upstream_decisions.is_empty() {
        doc.push_str("## Upstream decisions\n\n");
        for decision in &context.upstream_decisions {
            doc.push_str(&format!("- {}\n", decision.text));
        }
        doc.push('\n');
    }

    if !context.upstream_artifacts.is_empty() {
        doc.push_str("## Upstream artifacts\n\n");
        for artifact in &context.upstream_artifacts {
            doc.push_str(&format!("- {} ({})\n", artifact.filename, artifact.location));
        }
        doc.push('\n');
    }

    if !context.dependent_needs.is_empty() {
        doc.push_str("## Downstream needs\n\n");
        for need in &context.dependent_needs {
            doc.push_str(&format!("- {need}\n"));
        }
    }

    doc
}

pub fn affected_tasks_for_decision(text: &str, project_tasks: &[Task], direct_dependents: &[TaskId]) -> Vec<TaskId> {
    let mentioned: Vec<TaskId> = project_tasks
        .iter()
        .filter(|t| text.to_lowercase().contains(&t.name.to_lowercase()))
        .map(|t| t.id.clone())
        .collect();

    if mentioned.is_empty() {
        direct_dependents.to_vec()
    } else {
        mentioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AgentId, ProjectId};
    use crate::task::{ArtifactType, Priority, TaskStatus};
    use chrono::Utc;

    fn task(id: &str, name: &str, labels: &[&str]) -> Task {
        Task {
            id: TaskId::new(id),
            project_id: ProjectId::new("p1"),
            name: name.to_owned(),
            description: "do the thing".to_owned(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            priority: Priority::Medium,
            status: TaskStatus::Todo,
            dependencies: vec![],
            estimated_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn downstream_test_task_gets_endpoint_example_need() {
        let t1 = task("t1", "Implement /orders", &[]);
        let t2 = task("t2", "Test /orders", &["test"]);
        let context = build_context(&t1, vec![], vec![], &[t2]);
        assert_eq!(context.dependent_needs.len(), 1);
        assert!(context.dependent_needs[0].contains("documented endpoints with example requests/responses"));
    }

    #[test]
    fn upstream_artifacts_are_bounded_per_type() {
        let t1 = task("t1", "Implement /orders", &[]);
        let artifacts: Vec<Artifact> = (0..8)
            .map(|i| Artifact {
                id: format!("a{i}"),
                task_id: TaskId::new("upstream"),
                agent_id: AgentId::new("a1"),
                filename: format!("file{i}.md"),
                artifact_type: ArtifactType::Api,
                location: "/tmp".to_string(),
                description: String::new(),
                created_at: Utc::now(),
            })
            .collect();
        let context = build_context(&t1, artifacts, vec![], &[]);
        assert_eq!(context.upstream_artifacts.len(), 5);
    }

    #[test]
    fn instructions_mark_previously_attempted() {
        let t1 = task("t1", "Implement /orders", &[]);
        let context = build_context(&t1, vec![], vec![], &[]);
        let doc = build_instructions(&t1, &context, true);
        assert!(doc.contains("previously attempted"));
    }
}
