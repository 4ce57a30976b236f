pub mod health_probe;
pub mod heartbeat_manager;
pub mod running_tasks;
pub mod task_execution;

pub use health_probe::HealthProbe;
pub use heartbeat_manager::HeartbeatManager;
pub use running_tasks::{RunningTask, RunningTasks};
pub use task_execution::{CancelHandler, TaskExecutionManager};
