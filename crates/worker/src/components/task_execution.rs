use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::messaging::{
    BrokerExt, BrokerRef, QUEUE_COMPLETED, QUEUE_ERROR, QUEUE_STARTED,
};
use conductor_domain::middleware::{EventType, Handler};
use conductor_domain::models::{Task, TaskState};
use conductor_domain::runtime::{RunContext, RuntimeRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HealthProbe, RunningTasks};

/// 在途任务计数，离开作用域时自动减一
struct LiveTask {
    live: Arc<AtomicUsize>,
}

impl LiveTask {
    fn start(live: &Arc<AtomicUsize>) -> Self {
        let count = live.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("conductor_worker_running_tasks").set(count as f64);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        let count = self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("conductor_worker_running_tasks").set(count as f64);
    }
}

/// 任务执行管理器：中间件链的终端处理器
///
/// 带探测配置的任务按服务任务处理，其余按普通任务处理。
pub struct TaskExecutionManager {
    broker: BrokerRef,
    runtime: RuntimeRef,
    running: Arc<RunningTasks>,
    probe: Arc<HealthProbe>,
    live: Arc<AtomicUsize>,
}

impl TaskExecutionManager {
    pub fn new(
        broker: BrokerRef,
        runtime: RuntimeRef,
        running: Arc<RunningTasks>,
        probe: Arc<HealthProbe>,
    ) -> Self {
        Self {
            broker,
            runtime,
            running,
            probe,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 当前在途任务数，用于心跳上报
    pub fn live_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    async fn run_regular_task(&self, task: &mut Task) -> ConductorResult<()> {
        let _live = LiveTask::start(&self.live);
        let cancel = CancellationToken::new();
        self.running.insert(&task.id, cancel.clone());

        let result = self.execute_regular_task(task, cancel).await;
        self.running.remove(&task.id);
        result
    }

    async fn execute_regular_task(
        &self,
        task: &mut Task,
        cancel: CancellationToken,
    ) -> ConductorResult<()> {
        task.state = TaskState::Running;
        self.broker.publish_task(QUEUE_STARTED, task).await?;
        info!("开始执行任务 {} ({})", task.id, task.name);

        let ctx = RunContext::new(cancel.clone());
        // 运行时只修改副本，队列消息始终基于原任务
        let mut runtime_task = task.clone();
        let outcome = match task.timeout_seconds.filter(|secs| *secs > 0) {
            Some(secs) => {
                match tokio::time::timeout(
                    Duration::from_secs(secs),
                    self.runtime.run(&ctx, &mut runtime_task),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        cancel.cancel();
                        Err(ConductorError::ExecutionTimeout)
                    }
                }
            }
            None => self.runtime.run(&ctx, &mut runtime_task).await,
        };

        match outcome {
            Ok(()) => task.mark_completed(runtime_task.result),
            Err(e) => task.mark_failed(e.to_string()),
        }

        match task.state {
            TaskState::Completed => {
                info!("任务 {} 执行完成", task.id);
                metrics::counter!("conductor_worker_tasks_total", "outcome" => "completed")
                    .increment(1);
                self.broker.publish_task(QUEUE_COMPLETED, task).await
            }
            TaskState::Failed => {
                warn!(
                    "任务 {} 执行失败: {}",
                    task.id,
                    task.error.as_deref().unwrap_or_default()
                );
                metrics::counter!("conductor_worker_tasks_total", "outcome" => "failed")
                    .increment(1);
                self.broker.publish_task(QUEUE_ERROR, task).await
            }
            state => Err(ConductorError::InvalidState(format!(
                "任务 {} 执行后处于意外状态 {}",
                task.id, state
            ))),
        }
    }

    async fn run_service_task(&self, task: &mut Task) -> ConductorResult<()> {
        let live = LiveTask::start(&self.live);
        let cancel = CancellationToken::new();
        self.running.insert(&task.id, cancel.clone());

        let ctx = RunContext::new(cancel.clone());
        // 运行时失败与探测失败只能有一方上报终止状态
        let reported = Arc::new(AtomicBool::new(false));
        task.state = TaskState::Running;
        info!("启动服务任务 {} ({})", task.id, task.name);

        {
            let runtime = Arc::clone(&self.runtime);
            let broker = Arc::clone(&self.broker);
            let running = Arc::clone(&self.running);
            let reported = Arc::clone(&reported);
            let ctx = ctx.clone();
            let mut runtime_task = task.clone();
            let mut report = task.clone();
            tokio::spawn(async move {
                let _live = live;
                let outcome = runtime.run(&ctx, &mut runtime_task).await;
                running.remove(&report.id);

                let Err(e) = outcome else {
                    info!("服务任务 {} 已退出", report.id);
                    return;
                };
                // 停止仍在进行的探测
                ctx.cancel.cancel();
                if reported.swap(true, Ordering::SeqCst) {
                    debug!("服务任务 {} 的终止状态已上报，忽略运行时错误: {}", report.id, e);
                    return;
                }
                report.mark_failed(e.to_string());
                warn!("服务任务 {} 运行失败: {}", report.id, e);
                if let Err(e) = broker.publish_task(QUEUE_ERROR, &report).await {
                    error!("发布服务任务 {} 的失败消息失败: {}", report.id, e);
                }
            });
        }

        let probe = task.probe.clone().unwrap_or_default();
        match self
            .probe
            .wait_until_healthy(&task.id, &probe, &ctx.ports, &cancel)
            .await
        {
            Ok(ports) => {
                if reported.load(Ordering::SeqCst) {
                    return Ok(());
                }
                self.running.set_ports(&task.id, ports.clone());
                task.ports = ports;
                info!("服务任务 {} 健康检查通过", task.id);
                self.broker.publish_task(QUEUE_STARTED, task).await
            }
            Err(ConductorError::Cancelled) => {
                debug!("服务任务 {} 在就绪前结束，停止探测", task.id);
                Ok(())
            }
            Err(e) => {
                if reported.swap(true, Ordering::SeqCst) {
                    return Ok(());
                }
                self.running.cancel(&task.id);
                task.mark_failed(e.to_string());
                warn!("服务任务 {} 健康检查失败", task.id);
                self.broker.publish_task(QUEUE_ERROR, task).await
            }
        }
    }
}

#[async_trait]
impl Handler<Task> for TaskExecutionManager {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        if task.is_service() {
            self.run_service_task(task).await
        } else {
            self.run_regular_task(task).await
        }
    }
}

/// 节点专属队列上的取消信号处理器
pub struct CancelHandler {
    running: Arc<RunningTasks>,
}

impl CancelHandler {
    pub fn new(running: Arc<RunningTasks>) -> Self {
        Self { running }
    }
}

#[async_trait]
impl Handler<Task> for CancelHandler {
    async fn handle(&self, _event: EventType, task: &mut Task) -> ConductorResult<()> {
        if self.running.cancel(&task.id) {
            info!("已取消任务 {}", task.id);
        } else {
            debug!("任务 {} 不在本节点运行，无需取消", task.id);
        }
        Ok(())
    }
}
