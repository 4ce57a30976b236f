use async_trait::async_trait;
use chrono::Utc;
use conductor_core::ConductorResult;
use conductor_domain::messaging::BrokerRef;
use conductor_domain::middleware::{EventType, Handler, HandlerRef};
use conductor_domain::models::{Job, JobState, Task, TaskState};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info};

use super::{require_job_id, signal_cancel};

/// 记录任务开始执行，并把首次开始执行的作业推进到 Running
pub struct StartedHandler {
    datastore: DatastoreRef,
    broker: BrokerRef,
    on_job: HandlerRef<Job>,
}

impl StartedHandler {
    pub fn new(datastore: DatastoreRef, broker: BrokerRef, on_job: HandlerRef<Job>) -> Self {
        Self {
            datastore,
            broker,
            on_job,
        }
    }

    /// 作业已经结束，通知执行节点停止该任务
    async fn cancel_stale(&self, task: &Task) -> ConductorResult<()> {
        let cancelled = self
            .datastore
            .update_task(
                &task.id,
                Box::new(|t: &mut Task| {
                    if t.state.is_active() {
                        t.mark_cancelled();
                    }
                    Ok(())
                }),
            )
            .await?;
        let mut signal = cancelled;
        signal.node_id = task.node_id.clone();
        signal_cancel(&self.broker, &signal).await
    }
}

#[async_trait]
impl Handler<Task> for StartedHandler {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        debug!("任务 {} 已在节点 {:?} 上开始执行", task.id, task.node_id);
        let job_id = require_job_id(task)?;

        let job = self.datastore.get_job(&job_id).await?;
        if !matches!(job.state, JobState::Scheduled | JobState::Running) {
            info!(
                "作业 {} 已处于 {}，取消任务 {}",
                job_id, job.state, task.id
            );
            return self.cancel_stale(task).await;
        }

        let incoming = task.clone();
        let started = self
            .datastore
            .update_task(
                &task.id,
                Box::new(move |t: &mut Task| {
                    // 乱序到达时不回退已结束的任务
                    if matches!(
                        t.state,
                        TaskState::Created | TaskState::Pending | TaskState::Scheduled
                    ) {
                        t.state = TaskState::Running;
                    }
                    t.started_at = incoming.started_at.or(t.started_at).or(Some(Utc::now()));
                    if incoming.node_id.is_some() {
                        t.node_id = incoming.node_id;
                    }
                    if !incoming.ports.is_empty() {
                        t.ports = incoming.ports;
                    }
                    Ok(())
                }),
            )
            .await?;

        let mut transitioned = false;
        let recorded = started.clone();
        let mut job = self
            .datastore
            .update_job(
                &job_id,
                Box::new(|j: &mut Job| {
                    j.update_execution(&recorded);
                    if j.state == JobState::Scheduled {
                        j.state = JobState::Running;
                        j.started_at = Some(Utc::now());
                        transitioned = true;
                    }
                    Ok(())
                }),
            )
            .await?;

        *task = started;
        if transitioned {
            info!("作业 {} 开始运行", job.id);
            self.on_job.handle(EventType::StateChange, &mut job).await?;
        }
        Ok(())
    }
}
