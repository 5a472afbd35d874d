pub mod completion;
pub mod cycle;
pub mod graph;
pub mod recurrence;
pub mod status;
pub mod task_service;
pub mod validate;

pub use graph::GraphIndex;
pub use recurrence::{IntervalResolver, RecurrenceEngine};
pub use task_service::TaskService;
