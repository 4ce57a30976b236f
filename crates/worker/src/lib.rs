//! 工作节点：领取任务、通过运行时执行、回报状态并发送心跳

pub mod components;
pub mod executors;
pub mod worker;

pub use components::{HealthProbe, RunningTasks};
pub use executors::ShellRuntime;
pub use worker::{Worker, WorkerBuilder};
