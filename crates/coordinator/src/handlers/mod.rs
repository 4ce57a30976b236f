//! 协调器侧的实体处理器
//!
//! 每个协调器队列对应一个处理器。任务处理器驱动作业处理器，
//! 作业处理器只通过 pending 队列派发新任务，不直接调用任务处理器。

mod completed;
mod error;
mod escalation;
mod heartbeat;
mod job;
mod log;
mod pending;
mod service;
mod started;

pub use completed::CompletedHandler;
pub use error::ErrorHandler;
pub use escalation::{JobEscalation, TaskEscalation};
pub use heartbeat::HeartbeatHandler;
pub use job::JobHandler;
pub use log::LogHandler;
pub use pending::PendingHandler;
pub use service::ServiceHandler;
pub use started::StartedHandler;

use chrono::Utc;
use conductor_core::{new_id, ConductorError, ConductorResult};
use conductor_domain::messaging::{exclusive_queue, BrokerExt, BrokerRef, QUEUE_PENDING};
use conductor_domain::models::{Job, Task, TaskState};
use conductor_domain::repositories::DatastoreRef;
use tracing::debug;

pub(crate) fn require_job_id(task: &Task) -> ConductorResult<String> {
    task.job_id
        .clone()
        .ok_or_else(|| ConductorError::InvalidState(format!("任务 {} 不属于任何作业", task.id)))
}

/// 根据作业声明的任务列表生成指定位置的任务实例
pub(crate) fn new_job_task(job: &Job, position: usize) -> ConductorResult<Task> {
    let declared = job.tasks.get(position).ok_or_else(|| {
        ConductorError::InvalidState(format!("作业 {} 在位置 {} 没有声明任务", job.id, position))
    })?;

    let mut task = declared.clone();
    task.id = new_id();
    task.job_id = Some(job.id.clone());
    task.position = position;
    task.state = TaskState::Pending;
    task.created_at = Some(Utc::now());
    Ok(task)
}

/// 持久化任务、写入作业执行记录并投递到 pending 队列
pub(crate) async fn dispatch_task(
    datastore: &DatastoreRef,
    broker: &BrokerRef,
    task: &Task,
) -> ConductorResult<()> {
    let job_id = require_job_id(task)?;
    datastore.create_task(task).await?;
    let recorded = task.clone();
    datastore
        .update_job(
            &job_id,
            Box::new(move |j: &mut Job| {
                j.record_execution(&recorded);
                Ok(())
            }),
        )
        .await?;
    broker.publish_task(QUEUE_PENDING, task).await?;
    debug!("任务 {} (作业 {} 位置 {}) 已派发", task.id, job_id, task.position);
    Ok(())
}

/// 向执行节点的专属队列发送取消信号；任务尚未分配节点时无需通知
pub(crate) async fn signal_cancel(broker: &BrokerRef, task: &Task) -> ConductorResult<()> {
    if let Some(node_id) = task.node_id.as_deref() {
        broker.publish_task(&exclusive_queue(node_id), task).await?;
        debug!("已向节点 {} 发送任务 {} 的取消信号", node_id, task.id);
    }
    Ok(())
}
