pub mod data;
pub mod dep;
pub mod task;

pub use data::{DataCommand, DataResult};
pub use dep::DepCommand;
pub use task::{TaskCommand, TaskResult};
