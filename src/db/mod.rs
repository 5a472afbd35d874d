pub mod repository;
pub mod schema;
pub mod task_repo;

pub use repository::{SqliteTaskRepository, TaskRepository};
pub use schema::{open_db, open_in_memory};
