pub mod events;
pub mod ids;
pub mod priority;
pub mod task;

pub use events::TaskEvent;
pub use ids::{RetryId, TaskId};
pub use priority::TaskPriority;
pub use task::{Task, TaskStatus};
