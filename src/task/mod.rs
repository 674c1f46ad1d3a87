//! Task records and the task store.

pub mod model;
pub mod store;

pub use model::{FailureKind, NewTask, Priority, Task, TaskFailure, TaskStatus};
pub use store::{TaskFilter, TaskStore, Transition};
