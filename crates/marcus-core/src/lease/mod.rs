//! Lease manager: per-assignment lease timers, renewal decay, expiry and
//! recycling, and stuck-task escalation.
//!
//! Timers are owned, cancellable async tasks (`tokio::time::sleep_until`
//! against a recomputed deadline, guarded by a `CancellationToken`) rather
//! than a background polling thread -- the same pattern the teacher's
//! orchestrator uses to cancel in-flight lifecycle work.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{Event, EventBus};
use crate::ids::{AgentId, TaskId};
use crate::task::{Priority, Task};

/// Injectable wall-clock so lease math is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub default_hours: f64,
    pub min_lease_hours: f64,
    pub max_lease_hours: f64,
    pub warning_hours: f64,
    pub renewal_decay_factor: f64,
    pub grace_period_minutes: i64,
    pub stuck_threshold_renewals: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_hours: 2.0,
            min_lease_hours: 0.5,
            max_lease_hours: 8.0,
            warning_hours: 0.5,
            renewal_decay_factor: 0.9,
            grace_period_minutes: 30,
            stuck_threshold_renewals: 5,
        }
    }
}

impl LeaseConfig {
    /// `duration = default * priority_multiplier * complexity_multiplier`,
    /// clipped to `[min_lease_hours, max_lease_hours]`.
    pub fn initial_duration_hours(&self, task: &Task) -> f64 {
        let duration =
            self.default_hours * task.priority.lease_multiplier() * task.complexity_multiplier();
        duration.clamp(self.min_lease_hours, self.max_lease_hours)
    }

    /// Next interval after a renewal: shrinks toward `min_lease_hours` by
    /// `renewal_decay_factor` each time.
    pub fn renewed_duration_hours(&self, current_hours: f64) -> f64 {
        let shrunk = current_hours * self.renewal_decay_factor;
        shrunk.max(self.min_lease_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Renewed,
    Warning,
    Expired,
    Stuck,
    Completed,
}

/// Tracked state for one active lease.
struct LeaseState {
    task_id: TaskId,
    agent_id: AgentId,
    deadline: DateTime<Utc>,
    current_duration_hours: f64,
    renewals: u32,
    cancel: CancellationToken,
}

/// Owns every active assignment's lease timer for one project.
pub struct LeaseManager {
    config: LeaseConfig,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    leases: RwLock<HashMap<TaskId, LeaseState>>,
}

impl LeaseManager {
    pub fn new(config: LeaseConfig, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            clock,
            events,
            leases: RwLock::new(HashMap::new()),
        }
    }

    /// Start a lease for a newly created assignment.
    pub async fn start(&self, task: &Task, agent_id: AgentId) -> DateTime<Utc> {
        let duration_hours = self.config.initial_duration_hours(task);
        let deadline = self.clock.now() + hours(duration_hours);
        let cancel = CancellationToken::new();

        let mut leases = self.leases.write().await;
        leases.insert(
            task.id.clone(),
            LeaseState {
                task_id: task.id.clone(),
                agent_id,
                deadline,
                current_duration_hours: duration_hours,
                renewals: 0,
                cancel,
            },
        );
        deadline
    }

    /// Cancel and drop a lease (on explicit completion or abandonment).
    pub async fn cancel(&self, task_id: &TaskId) {
        if let Some(state) = self.leases.write().await.remove(task_id) {
            state.cancel.cancel();
        }
    }

    /// Renew on strictly-increasing progress. Returns the new deadline.
    pub async fn renew(&self, task_id: &TaskId) -> Option<DateTime<Utc>> {
        let mut leases = self.leases.write().await;
        let state = leases.get_mut(task_id)?;
        state.renewals += 1;
        state.current_duration_hours = self.config.renewed_duration_hours(state.current_duration_hours);
        state.deadline = self.clock.now() + hours(state.current_duration_hours);

        if state.renewals >= self.config.stuck_threshold_renewals {
            self.events.publish_nowait(Event::new(
                "task_stuck",
                serde_json::json!({ "task_id": task_id.to_string(), "renewals": state.renewals }),
            ));
        }
        Some(state.deadline)
    }

    /// Evaluate whether this lease should warn, expire, or continue, given
    /// the current clock time. `last_progress_at` comes from the caller's
    /// Assignment record (grace period is measured from there).
    pub async fn evaluate(&self, task_id: &TaskId, last_progress_at: DateTime<Utc>) -> LeaseOutcome {
        let now = self.clock.now();
        let leases = self.leases.read().await;
        let Some(state) = leases.get(task_id) else {
            return LeaseOutcome::Completed;
        };

        let warning_at = state.deadline - hours(self.config.warning_hours);
        if now >= state.deadline {
            let grace_deadline = state.deadline + ChronoDuration::minutes(self.config.grace_period_minutes);
            if now >= grace_deadline && last_progress_at < state.deadline {
                return LeaseOutcome::Expired;
            }
            return LeaseOutcome::Warning;
        }
        if now >= warning_at {
            self.events.publish_nowait(Event::new(
                "lease_warning",
                serde_json::json!({ "task_id": task_id.to_string(), "agent_id": state.agent_id.to_string() }),
            ));
            return LeaseOutcome::Warning;
        }
        LeaseOutcome::Renewed
    }

    /// Spawn the cancellable timer task for a lease; `on_expired` is
    /// invoked once the grace period elapses without renewal.
    pub fn spawn_timer<F, Fut>(self: &Arc<Self>, task_id: TaskId, on_expired: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let (deadline, cancel) = {
                    let leases = manager.leases.read().await;
                    match leases.get(&task_id) {
                        Some(state) => (
                            state.deadline + ChronoDuration::minutes(manager.config.grace_period_minutes),
                            state.cancel.clone(),
                        ),
                        None => return,
                    }
                };

                let now = manager.clock.now();
                let wait = (deadline - now).to_std().unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                let still_active = manager.leases.read().await.contains_key(&task_id);
                if !still_active {
                    return;
                }
                warn!(task_id = %task_id, "lease grace period elapsed");
                on_expired().await;
                return;
            }
        });
    }
}

fn hours(h: f64) -> ChronoDuration {
    ChronoDuration::milliseconds((h * 3_600_000.0) as i64)
}
