use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{new_id, ConductorResult};
use conductor_domain::messaging::BrokerRef;
use conductor_domain::middleware::{EventType, Handler, HandlerRef};
use conductor_domain::models::{Job, JobState, Task, TaskRetry};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info, warn};

use super::{dispatch_task, require_job_id};

/// 记录任务失败，在重试预算内重新派发，否则让作业失败
pub struct ErrorHandler {
    datastore: DatastoreRef,
    broker: BrokerRef,
    on_job: HandlerRef<Job>,
}

impl ErrorHandler {
    pub fn new(datastore: DatastoreRef, broker: BrokerRef, on_job: HandlerRef<Job>) -> Self {
        Self {
            datastore,
            broker,
            on_job,
        }
    }
}

/// 任务自身的重试策略优先，其次是作业默认值
fn retry_policy(task: &Task, job: &Job) -> Option<TaskRetry> {
    task.retry
        .clone()
        .or_else(|| job.defaults.as_ref().and_then(|d| d.retry.clone()))
}

#[async_trait]
impl Handler<Task> for ErrorHandler {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        let job_id = require_job_id(task)?;
        warn!(
            "任务 {} 执行失败: {}",
            task.id,
            task.error.as_deref().unwrap_or("未知错误")
        );

        let mut duplicate = false;
        let incoming = task.clone();
        let failed = self
            .datastore
            .update_task(
                &task.id,
                Box::new(|t: &mut Task| {
                    // 已完成或已取消的任务保留原有终态
                    if t.state.is_terminal() {
                        duplicate = true;
                        return Ok(());
                    }
                    t.mark_failed(incoming.error.unwrap_or_else(|| "未知错误".to_string()));
                    if let Some(failed_at) = incoming.failed_at {
                        t.failed_at = Some(failed_at);
                    }
                    if incoming.node_id.is_some() {
                        t.node_id = incoming.node_id;
                    }
                    Ok(())
                }),
            )
            .await?;

        if duplicate {
            debug!("任务 {} 已处于 {}，忽略失败消息", failed.id, failed.state);
            return Ok(());
        }
        *task = failed.clone();

        let recorded = failed.clone();
        let mut job = self
            .datastore
            .update_job(
                &job_id,
                Box::new(move |j: &mut Job| {
                    j.update_execution(&recorded);
                    Ok(())
                }),
            )
            .await?;

        if !job.state.is_active() {
            debug!("作业 {} 已处于 {}，不处理任务 {} 的失败", job.id, job.state, failed.id);
            return Ok(());
        }

        match retry_policy(&failed, &job) {
            Some(policy) if policy.has_remaining() => {
                let mut source = failed.clone();
                source.retry = Some(policy);
                let retry = source.to_retry(new_id());
                let attempts = retry.retry.as_ref().map_or(0, |r| r.attempts);
                dispatch_task(&self.datastore, &self.broker, &retry).await?;
                metrics::counter!("conductor_task_retries_total").increment(1);
                info!(
                    "任务 {} 第 {} 次重试，新任务ID {}",
                    failed.id, attempts, retry.id
                );
                Ok(())
            }
            _ => {
                job.state = JobState::Failed;
                job.failed_at = Some(Utc::now());
                job.error = failed.error.clone();
                self.on_job.handle(EventType::StateChange, &mut job).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::models::JobDefaults;

    #[test]
    fn test_task_policy_overrides_job_default() {
        let job = Job {
            defaults: Some(JobDefaults {
                retry: Some(TaskRetry::new(5)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut task = Task::default();
        assert_eq!(retry_policy(&task, &job).map(|r| r.limit), Some(5));

        task.retry = Some(TaskRetry::new(1));
        assert_eq!(retry_policy(&task, &job).map(|r| r.limit), Some(1));
    }

    #[test]
    fn test_exhausted_budget_has_no_remaining() {
        let policy = TaskRetry {
            limit: 2,
            attempts: 2,
        };
        assert!(!policy.has_remaining());
    }
}
