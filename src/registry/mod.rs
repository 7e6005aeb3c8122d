//! Task lifecycle registry.
//!
//! Single source of truth for asynchronous work: API handlers create tasks,
//! background jobs mutate them, pollers read them. All state is in-memory and
//! process-local; durability across restarts is out of scope.

mod store;
mod task;

pub use store::{TaskFilter, TaskPage, TaskRegistry};
pub use task::{Task, TaskParams, TaskStatus, TaskType, TaskUpdate};
