//! 协调器：把生命周期处理器挂到协调器队列上，负责作业推进、心跳与优雅关闭

pub mod coordinator;
pub mod handlers;
pub mod webhook;

pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorMiddleware};
pub use webhook::WebhookNotifier;
