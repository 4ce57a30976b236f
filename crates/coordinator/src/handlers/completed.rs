use async_trait::async_trait;
use conductor_core::ConductorResult;
use conductor_domain::messaging::BrokerRef;
use conductor_domain::middleware::{EventType, Handler, HandlerRef};
use conductor_domain::models::{Job, JobState, Task};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info};

use super::{dispatch_task, new_job_task, require_job_id};

/// 记录任务完成并推进作业；最后一个任务完成时作业进入 Completed
pub struct CompletedHandler {
    datastore: DatastoreRef,
    broker: BrokerRef,
    on_job: HandlerRef<Job>,
}

impl CompletedHandler {
    pub fn new(datastore: DatastoreRef, broker: BrokerRef, on_job: HandlerRef<Job>) -> Self {
        Self {
            datastore,
            broker,
            on_job,
        }
    }
}

#[async_trait]
impl Handler<Task> for CompletedHandler {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        let job_id = require_job_id(task)?;

        let mut duplicate = false;
        let incoming = task.clone();
        let completed = self
            .datastore
            .update_task(
                &task.id,
                Box::new(|t: &mut Task| {
                    // 终态只写一次：已失败或已取消的任务不会被迟到的完成消息覆盖
                    if t.state.is_terminal() {
                        duplicate = true;
                        return Ok(());
                    }
                    t.mark_completed(incoming.result);
                    if let Some(completed_at) = incoming.completed_at {
                        t.completed_at = Some(completed_at);
                    }
                    if incoming.started_at.is_some() {
                        t.started_at = incoming.started_at;
                    }
                    if incoming.node_id.is_some() {
                        t.node_id = incoming.node_id;
                    }
                    Ok(())
                }),
            )
            .await?;

        if duplicate {
            debug!("任务 {} 已处于 {}，忽略完成消息", completed.id, completed.state);
            return Ok(());
        }
        info!("任务 {} 已完成", completed.id);

        let mut advanced = false;
        let recorded = completed.clone();
        let mut job = self
            .datastore
            .update_job(
                &job_id,
                Box::new(|j: &mut Job| {
                    j.update_execution(&recorded);
                    if !j.state.is_active() {
                        return Ok(());
                    }
                    if let (Some(var), Some(result)) = (&recorded.var, &recorded.result) {
                        j.context.tasks.insert(var.clone(), result.clone());
                    }
                    if recorded.position + 1 > j.position {
                        j.position = recorded.position + 1;
                        advanced = true;
                    }
                    if j.is_finished() {
                        j.state = JobState::Completed;
                    }
                    Ok(())
                }),
            )
            .await?;
        *task = completed;

        match job.state {
            JobState::Completed => {
                info!("作业 {} 的全部 {} 个任务已完成", job.id, job.task_count);
                self.on_job.handle(EventType::StateChange, &mut job).await
            }
            state if !state.is_active() => {
                debug!("作业 {} 已处于 {}，不再推进", job.id, state);
                Ok(())
            }
            _ if !advanced => {
                debug!("作业 {} 的位置已经越过任务 {}", job.id, task.id);
                Ok(())
            }
            _ => {
                let next = new_job_task(&job, job.position)?;
                dispatch_task(&self.datastore, &self.broker, &next).await
            }
        }
    }
}
