use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::events::{
    TOPIC_JOB_CANCELLED, TOPIC_JOB_COMPLETED, TOPIC_JOB_FAILED, TOPIC_JOB_RUNNING,
};
use conductor_domain::messaging::{BrokerExt, BrokerRef};
use conductor_domain::middleware::{
    apply_middleware, EventType, Handler, HandlerRef, MiddlewareRef, NoopHandler,
};
use conductor_domain::models::{Job, JobState, Service, ServiceState, Task, TaskState};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info, warn};

use super::{dispatch_task, new_job_task, signal_cancel};
use crate::webhook::WebhookNotifier;

/// 作业生命周期处理器，按作业当前状态分派
pub struct JobHandler {
    datastore: DatastoreRef,
    broker: BrokerRef,
    /// 任务被取消时经过任务中间件
    on_cancel: HandlerRef<Task>,
    webhooks: WebhookNotifier,
}

impl JobHandler {
    pub fn new(
        datastore: DatastoreRef,
        broker: BrokerRef,
        task_middleware: Vec<MiddlewareRef<Task>>,
    ) -> Self {
        let noop: HandlerRef<Task> = Arc::new(NoopHandler);
        Self {
            datastore,
            broker,
            on_cancel: apply_middleware(noop, task_middleware),
            webhooks: WebhookNotifier::new(),
        }
    }

    async fn start_job(&self, job: &mut Job) -> ConductorResult<()> {
        debug!("启动作业 {}", job.id);
        let mut fresh = false;
        let scheduled = self
            .datastore
            .update_job(
                &job.id,
                Box::new(|j: &mut Job| {
                    if j.state == JobState::Pending {
                        j.state = JobState::Scheduled;
                        fresh = true;
                    }
                    Ok(())
                }),
            )
            .await?;
        *job = scheduled;

        if !fresh {
            debug!("作业 {} 已处于 {}，忽略重复的启动消息", job.id, job.state);
            return Ok(());
        }

        if job.task_count == 0 {
            info!("作业 {} 没有任务，直接完成", job.id);
            let completed = self
                .datastore
                .update_job(
                    &job.id,
                    Box::new(|j: &mut Job| {
                        j.state = JobState::Completed;
                        Ok(())
                    }),
                )
                .await?;
            *job = completed;
            return self.complete_job(job).await;
        }

        let first = new_job_task(job, job.position)?;
        dispatch_task(&self.datastore, &self.broker, &first).await?;
        info!("作业 {} 已调度，共 {} 个任务", job.id, job.task_count);
        Ok(())
    }

    async fn job_running(&self, job: &mut Job) -> ConductorResult<()> {
        self.publish_state_change(job, TOPIC_JOB_RUNNING).await?;
        self.track_service(job, ServiceState::Running).await
    }

    async fn cancel_job(&self, job: &mut Job) -> ConductorResult<()> {
        let mut changed = false;
        let cancelled = self
            .datastore
            .update_job(
                &job.id,
                Box::new(|j: &mut Job| {
                    if j.state.is_active() {
                        j.state = JobState::Cancelled;
                        j.cancelled_at = Some(Utc::now());
                        changed = true;
                    }
                    Ok(())
                }),
            )
            .await?;
        *job = cancelled;

        if !changed {
            debug!("作业 {} 已处于 {}，无需取消", job.id, job.state);
            return Ok(());
        }

        info!("取消作业 {}", job.id);
        self.cancel_active_tasks(job).await?;
        self.publish_state_change(job, TOPIC_JOB_CANCELLED).await?;
        self.track_service(job, ServiceState::Stopped).await
    }

    async fn restart_job(&self, job: &mut Job) -> ConductorResult<()> {
        let mut restartable = false;
        let restarted = self
            .datastore
            .update_job(
                &job.id,
                Box::new(|j: &mut Job| {
                    if j.state != JobState::Restart {
                        return Ok(());
                    }
                    if j.position >= j.task_count {
                        return Err(ConductorError::InvalidState(format!(
                            "作业 {} 没有可重启的任务",
                            j.id
                        )));
                    }
                    j.state = JobState::Running;
                    j.failed_at = None;
                    j.cancelled_at = None;
                    j.error = None;
                    restartable = true;
                    Ok(())
                }),
            )
            .await?;
        *job = restarted;

        if !restartable {
            warn!("作业 {} 当前状态为 {}，忽略重启请求", job.id, job.state);
            return Ok(());
        }

        let task = new_job_task(job, job.position)?;
        dispatch_task(&self.datastore, &self.broker, &task).await?;
        info!("作业 {} 从位置 {} 重启", job.id, job.position);
        Ok(())
    }

    async fn complete_job(&self, job: &mut Job) -> ConductorResult<()> {
        let mut finished = false;
        let completed = self
            .datastore
            .update_job(
                &job.id,
                Box::new(|j: &mut Job| {
                    if j.state != JobState::Completed {
                        return Err(ConductorError::InvalidState(format!(
                            "作业 {} 当前状态为 {}，不能标记完成",
                            j.id, j.state
                        )));
                    }
                    if j.completed_at.is_some() {
                        return Ok(());
                    }
                    let now = Utc::now();
                    j.completed_at = Some(now);
                    j.result = j
                        .execution
                        .iter()
                        .rev()
                        .find(|t| t.state == TaskState::Completed)
                        .and_then(|t| t.result.clone());
                    j.delete_at = j
                        .auto_delete
                        .as_ref()
                        .map(|policy| now + Duration::seconds(policy.after_seconds as i64));
                    finished = true;
                    Ok(())
                }),
            )
            .await?;
        *job = completed;

        if !finished {
            debug!("作业 {} 的完成事件已处理过", job.id);
            return Ok(());
        }

        info!("作业 {} 已完成", job.id);
        metrics::counter!("conductor_jobs_finished_total", "state" => "completed").increment(1);
        self.publish_state_change(job, TOPIC_JOB_COMPLETED).await?;
        self.track_service(job, ServiceState::Stopped).await
    }

    async fn fail_job(&self, job: &mut Job) -> ConductorResult<()> {
        let mut changed = false;
        let failed_at = job.failed_at.unwrap_or_else(Utc::now);
        let error = job.error.clone();
        let failed = self
            .datastore
            .update_job(
                &job.id,
                Box::new(|j: &mut Job| {
                    if j.state == JobState::Failed && j.failed_at.is_some() {
                        return Ok(());
                    }
                    j.state = JobState::Failed;
                    j.failed_at = Some(failed_at);
                    if error.is_some() {
                        j.error = error;
                    }
                    changed = true;
                    Ok(())
                }),
            )
            .await?;
        *job = failed;

        if !changed {
            debug!("作业 {} 的失败事件已处理过", job.id);
            return Ok(());
        }

        warn!(
            "作业 {} 失败: {}",
            job.id,
            job.error.as_deref().unwrap_or("未知错误")
        );
        metrics::counter!("conductor_jobs_finished_total", "state" => "failed").increment(1);
        self.cancel_active_tasks(job).await?;
        self.fail_parent(job).await?;
        self.publish_state_change(job, TOPIC_JOB_FAILED).await?;
        self.track_service(job, ServiceState::Failed).await
    }

    /// 子作业失败时让父作业一并失败
    async fn fail_parent(&self, job: &Job) -> ConductorResult<()> {
        let Some(parent_id) = job.parent_id.as_deref() else {
            return Ok(());
        };
        let mut parent = self.datastore.get_job(parent_id).await?;
        if !parent.state.is_active() {
            return Ok(());
        }
        parent.state = JobState::Failed;
        parent.failed_at = Some(Utc::now());
        parent.error = Some(format!(
            "子作业 {} 失败: {}",
            job.id,
            job.error.as_deref().unwrap_or("未知错误")
        ));
        info!("子作业 {} 失败，通知父作业 {}", job.id, parent.id);
        self.broker.publish_job(&parent).await
    }

    async fn cancel_active_tasks(&self, job: &Job) -> ConductorResult<()> {
        for task in self.datastore.get_active_tasks(&job.id).await? {
            let mut cancelled = self
                .datastore
                .update_task(
                    &task.id,
                    Box::new(|t: &mut Task| {
                        t.mark_cancelled();
                        Ok(())
                    }),
                )
                .await?;
            self.on_cancel
                .handle(EventType::StateChange, &mut cancelled)
                .await?;
            signal_cancel(&self.broker, &cancelled).await?;
        }
        Ok(())
    }

    async fn publish_state_change(&self, job: &Job, topic: &str) -> ConductorResult<()> {
        self.broker
            .emit_event(topic, serde_json::to_value(job.summary())?)
            .await?;
        self.webhooks.notify(job);
        Ok(())
    }

    /// 部署作业的状态同步到所属服务
    async fn track_service(&self, job: &Job, state: ServiceState) -> ConductorResult<()> {
        let Some(service_id) = job.service_id.as_deref() else {
            return Ok(());
        };
        let service = self.datastore.get_service_by_id(service_id).await?;
        self.datastore
            .update_service(
                &service.namespace,
                &service.name,
                Box::new(move |s: &mut Service| {
                    s.state = state;
                    Ok(())
                }),
            )
            .await?;
        debug!("服务 {}/{} 进入 {}", service.namespace, service.name, state);
        Ok(())
    }
}

#[async_trait]
impl Handler<Job> for JobHandler {
    async fn handle(&self, _event: EventType, job: &mut Job) -> ConductorResult<()> {
        match job.state {
            JobState::Pending => self.start_job(job).await,
            JobState::Scheduled => {
                debug!("作业 {} 已调度，无需处理", job.id);
                Ok(())
            }
            JobState::Running => self.job_running(job).await,
            JobState::Cancelled => self.cancel_job(job).await,
            JobState::Restart => self.restart_job(job).await,
            JobState::Completed => self.complete_job(job).await,
            JobState::Failed => self.fail_job(job).await,
        }
    }
}
