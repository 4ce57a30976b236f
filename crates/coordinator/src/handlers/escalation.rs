use async_trait::async_trait;
use chrono::Utc;
use conductor_core::ConductorResult;
use conductor_domain::middleware::{EventType, Handler, HandlerRef};
use conductor_domain::models::{Job, JobState, Task};
use tracing::warn;

/// 处理器自身出错时，把任务标记为失败并交给错误处理器
pub struct TaskEscalation {
    inner: HandlerRef<Task>,
    on_error: HandlerRef<Task>,
}

impl TaskEscalation {
    pub fn new(inner: HandlerRef<Task>, on_error: HandlerRef<Task>) -> Self {
        Self { inner, on_error }
    }
}

#[async_trait]
impl Handler<Task> for TaskEscalation {
    async fn handle(&self, event: EventType, task: &mut Task) -> ConductorResult<()> {
        if let Err(e) = self.inner.handle(event, task).await {
            warn!("处理任务 {} 时出错，转交错误处理器: {}", task.id, e);
            metrics::counter!("conductor_handler_escalations_total", "entity" => "task")
                .increment(1);
            task.mark_failed(e.to_string());
            return self.on_error.handle(event, task).await;
        }
        Ok(())
    }
}

/// 作业处理器出错时强制作业失败
pub struct JobEscalation {
    inner: HandlerRef<Job>,
    on_failure: HandlerRef<Job>,
}

impl JobEscalation {
    pub fn new(inner: HandlerRef<Job>, on_failure: HandlerRef<Job>) -> Self {
        Self { inner, on_failure }
    }
}

#[async_trait]
impl Handler<Job> for JobEscalation {
    async fn handle(&self, event: EventType, job: &mut Job) -> ConductorResult<()> {
        if let Err(e) = self.inner.handle(event, job).await {
            warn!("处理作业 {} 时出错，标记为失败: {}", job.id, e);
            metrics::counter!("conductor_handler_escalations_total", "entity" => "job")
                .increment(1);
            job.state = JobState::Failed;
            job.failed_at = Some(Utc::now());
            job.error = Some(e.to_string());
            return self.on_failure.handle(event, job).await;
        }
        Ok(())
    }
}
