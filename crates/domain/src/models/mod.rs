pub mod job;
pub mod log_part;
pub mod node;
pub mod service;
pub mod task;

pub use job::{AutoDelete, Job, JobContext, JobDefaults, JobState, JobSummary, Permission, Webhook};
pub use log_part::TaskLogPart;
pub use node::{Node, NodeStatus};
pub use service::{Service, ServiceState, DEFAULT_NAMESPACE};
pub use task::{Port, Probe, Task, TaskLimits, TaskRetry, TaskState};
