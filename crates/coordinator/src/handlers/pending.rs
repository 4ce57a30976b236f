use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::messaging::{is_worker_queue, BrokerExt, BrokerRef, QUEUE_DEFAULT};
use conductor_domain::middleware::{EventType, Handler};
use conductor_domain::models::{JobDefaults, Task, TaskState};
use conductor_domain::repositories::DatastoreRef;
use tracing::{debug, info};

/// 把新建任务投递到工作队列
pub struct PendingHandler {
    datastore: DatastoreRef,
    broker: BrokerRef,
}

impl PendingHandler {
    pub fn new(datastore: DatastoreRef, broker: BrokerRef) -> Self {
        Self { datastore, broker }
    }
}

/// 任务自身的配置优先于作业默认值
fn apply_job_defaults(task: &mut Task, defaults: &JobDefaults) {
    if task.limits.is_none() {
        task.limits = defaults.limits.clone();
    }
    if task.timeout_seconds.is_none() {
        task.timeout_seconds = defaults.timeout_seconds;
    }
    if task.retry.is_none() {
        task.retry = defaults.retry.clone();
    }
    if task.priority == 0 {
        task.priority = defaults.priority;
    }
}

fn resolve_queue(task: &Task, defaults: Option<&JobDefaults>) -> String {
    task.queue
        .clone()
        .filter(|q| !q.is_empty())
        .or_else(|| defaults.and_then(|d| d.queue.clone()).filter(|q| !q.is_empty()))
        .unwrap_or_else(|| QUEUE_DEFAULT.to_string())
}

#[async_trait]
impl Handler<Task> for PendingHandler {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        debug!("处理待调度任务: {}", task.id);

        let defaults = match task.job_id.as_deref() {
            Some(job_id) => self.datastore.get_job(job_id).await?.defaults,
            None => None,
        };
        let queue = resolve_queue(task, defaults.as_ref());
        if !is_worker_queue(&queue) {
            return Err(ConductorError::InvalidState(format!(
                "任务 {} 不能投递到保留队列 {}",
                task.id, queue
            )));
        }

        let mut stale = false;
        let target = queue.clone();
        let scheduled = self
            .datastore
            .update_task(
                &task.id,
                Box::new(|t: &mut Task| {
                    if t.state != TaskState::Pending {
                        stale = true;
                        return Ok(());
                    }
                    if let Some(defaults) = defaults.as_ref() {
                        apply_job_defaults(t, defaults);
                    }
                    t.queue = Some(target);
                    t.state = TaskState::Scheduled;
                    t.scheduled_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        if stale {
            debug!("任务 {} 当前状态为 {}，跳过调度", scheduled.id, scheduled.state);
            return Ok(());
        }

        self.broker.publish_task(&queue, &scheduled).await?;
        metrics::counter!("conductor_tasks_scheduled_total", "queue" => queue.clone()).increment(1);
        info!("任务 {} 已调度到队列 {}", scheduled.id, queue);
        *task = scheduled;
        Ok(())
    }
}
