//! Marcus's domain logic: the task/project/agent model, the dependency
//! graph, the assignment engine, lease management, memory/prediction, and
//! the `Coordinator` that composes all of it behind one API surface.

pub mod assignment;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod interfaces;
pub mod lease;
pub mod memory;
pub mod task;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{CoreError, ErrorResponse, Result};
pub use events::{Event, EventBus};
pub use ids::{AgentId, ProjectId, TaskId};
