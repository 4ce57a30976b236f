use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conductor_core::{
    new_short_id, ConductorError, ConductorResult, ProbeConfig, WorkerConfig, WorkerLimits,
};
use conductor_domain::messaging::{
    exclusive_queue, is_worker_queue, BrokerExt, BrokerRef, QUEUE_DEFAULT, QUEUE_ERROR,
};
use conductor_domain::middleware::{
    apply_middleware, EventType, Handler, HandlerRef, MiddlewareRef,
};
use conductor_domain::models::{Task, TaskLimits};
use conductor_domain::runtime::RuntimeRef;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::components::{
    CancelHandler, HealthProbe, HeartbeatManager, RunningTasks, TaskExecutionManager,
};

/// Worker构建器
pub struct WorkerBuilder {
    name: String,
    broker: Option<BrokerRef>,
    runtime: Option<RuntimeRef>,
    queues: HashMap<String, usize>,
    heartbeat_interval: Duration,
    shutdown_timeout: Duration,
    limits: WorkerLimits,
    probe: ProbeConfig,
    middleware: Vec<MiddlewareRef<Task>>,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            name: "worker".to_string(),
            broker: None,
            runtime: None,
            queues: HashMap::new(),
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(15),
            limits: WorkerLimits::default(),
            probe: ProbeConfig::default(),
            middleware: Vec::new(),
        }
    }

    /// 从配置文件的 `[worker]` 段初始化
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            name: config.name.clone(),
            queues: config.queues.clone(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            limits: config.limits.clone(),
            probe: config.probe.clone(),
            ..Self::new()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn broker(mut self, broker: BrokerRef) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn runtime(mut self, runtime: RuntimeRef) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 订阅工作队列，`concurrency` 为该队列的并发处理数
    pub fn queue(mut self, queue: impl Into<String>, concurrency: usize) -> Self {
        self.queues.insert(queue.into(), concurrency);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: WorkerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareRef<Task>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> ConductorResult<Worker> {
        let broker = self
            .broker
            .ok_or_else(|| ConductorError::Configuration("必须提供消息代理".to_string()))?;
        let runtime = self
            .runtime
            .ok_or_else(|| ConductorError::Configuration("必须提供运行时".to_string()))?;

        let mut queues = self.queues;
        if queues.is_empty() {
            queues.insert(QUEUE_DEFAULT.to_string(), 1);
        }

        let id = new_short_id();
        let running = Arc::new(RunningTasks::new());
        let probe = Arc::new(HealthProbe::new(&self.probe)?);
        let executor = Arc::new(TaskExecutionManager::new(
            Arc::clone(&broker),
            Arc::clone(&runtime),
            Arc::clone(&running),
            probe,
        ));
        let heartbeats = Arc::new(HeartbeatManager::new(
            id.clone(),
            self.name.clone(),
            Arc::clone(&broker),
            runtime,
            executor.live_count(),
            self.heartbeat_interval,
        ));

        let terminal: HandlerRef<Task> = executor;
        let intake = Arc::new(TaskIntake {
            node_id: id.clone(),
            limits: self.limits,
            broker: Arc::clone(&broker),
            pipeline: apply_middleware(terminal, self.middleware),
        });

        Ok(Worker {
            id,
            name: self.name,
            broker,
            queues,
            running,
            intake,
            heartbeats,
            shutdown_timeout: self.shutdown_timeout,
            shutdown: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        })
    }
}

/// 工作队列上的任务入口
///
/// 补全节点信息与默认限制后交给中间件链；链上的任何错误都让任务失败并发布到 error 队列。
struct TaskIntake {
    node_id: String,
    limits: WorkerLimits,
    broker: BrokerRef,
    pipeline: HandlerRef<Task>,
}

impl TaskIntake {
    fn prepare(&self, task: &mut Task) {
        task.started_at = Some(Utc::now());
        task.node_id = Some(self.node_id.clone());

        if task.limits.is_none() && (self.limits.cpus.is_some() || self.limits.memory.is_some())
        {
            task.limits = Some(TaskLimits::default());
        }
        if let Some(limits) = task.limits.as_mut() {
            if limits.cpus.is_none() {
                limits.cpus = self.limits.cpus.clone();
            }
            if limits.memory.is_none() {
                limits.memory = self.limits.memory.clone();
            }
        }
        if task.timeout_seconds.is_none() {
            task.timeout_seconds = self.limits.timeout_seconds;
        }
    }
}

#[async_trait]
impl Handler<Task> for TaskIntake {
    async fn handle(&self, event: EventType, task: &mut Task) -> ConductorResult<()> {
        self.prepare(task);
        if let Err(e) = self.pipeline.handle(event, task).await {
            warn!("任务 {} 处理失败: {}", task.id, e);
            task.mark_failed(e.to_string());
            return self.broker.publish_task(QUEUE_ERROR, task).await;
        }
        Ok(())
    }
}

/// 工作节点：从工作队列领取任务，通过运行时执行并回报状态
pub struct Worker {
    id: String,
    name: String,
    broker: BrokerRef,
    queues: HashMap<String, usize>,
    running: Arc<RunningTasks>,
    intake: Arc<TaskIntake>,
    heartbeats: Arc<HeartbeatManager>,
    shutdown_timeout: Duration,
    shutdown: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 接收取消信号的专属队列
    pub fn cancel_queue(&self) -> String {
        exclusive_queue(&self.id)
    }

    pub fn queue_concurrency(&self) -> &HashMap<String, usize> {
        &self.queues
    }

    pub fn running_tasks(&self) -> Arc<RunningTasks> {
        Arc::clone(&self.running)
    }

    pub async fn start(&self) -> ConductorResult<()> {
        info!("启动工作节点 {} ({})", self.name, self.id);

        self.broker
            .subscribe_for_tasks(
                &self.cancel_queue(),
                Arc::new(CancelHandler::new(Arc::clone(&self.running))),
            )
            .await?;

        let mut queues: Vec<(&String, &usize)> = self.queues.iter().collect();
        queues.sort();
        for (queue, concurrency) in queues {
            if !is_worker_queue(queue) {
                warn!("队列 {} 不是工作队列，跳过订阅", queue);
                continue;
            }
            for _ in 0..*concurrency {
                self.broker
                    .subscribe_for_tasks(queue, Arc::clone(&self.intake) as HandlerRef<Task>)
                    .await?;
            }
            debug!("已订阅工作队列 {}，并发数 {}", queue, concurrency);
        }

        let handle = Arc::clone(&self.heartbeats).start(self.shutdown.clone());
        match self.heartbeat.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(_) => warn!("心跳句柄锁已损坏"),
        }
        Ok(())
    }

    pub async fn stop(&self) -> ConductorResult<()> {
        debug!("关闭工作节点 {}", self.id);
        self.shutdown.cancel();

        let handle = self.heartbeat.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("心跳循环异常退出: {}", e);
            }
        }

        tokio::time::timeout(self.shutdown_timeout, self.broker.shutdown())
            .await
            .map_err(|_| ConductorError::Internal("关闭消息代理超时".to_string()))??;
        info!("工作节点 {} 已停止", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::middleware::NoopHandler;
    use conductor_infrastructure::InMemoryBroker;

    fn intake(limits: WorkerLimits) -> TaskIntake {
        TaskIntake {
            node_id: "n1".to_string(),
            limits,
            broker: Arc::new(InMemoryBroker::new()),
            pipeline: Arc::new(NoopHandler),
        }
    }

    #[test]
    fn test_prepare_fills_node_defaults() {
        let intake = intake(WorkerLimits {
            cpus: Some("1".into()),
            memory: None,
            timeout_seconds: Some(60),
        });
        let mut task = Task::default();
        intake.prepare(&mut task);

        assert_eq!(task.node_id.as_deref(), Some("n1"));
        assert!(task.started_at.is_some());
        assert_eq!(task.limits.as_ref().and_then(|l| l.cpus.as_deref()), Some("1"));
        assert_eq!(task.timeout_seconds, Some(60));
    }

    #[test]
    fn test_prepare_keeps_task_values() {
        let intake = intake(WorkerLimits {
            cpus: Some("1".into()),
            memory: Some("512m".into()),
            timeout_seconds: Some(60),
        });
        let mut task = Task {
            limits: Some(TaskLimits {
                cpus: Some("4".into()),
                memory: None,
            }),
            timeout_seconds: Some(5),
            ..Default::default()
        };
        intake.prepare(&mut task);

        let limits = task.limits.unwrap();
        assert_eq!(limits.cpus.as_deref(), Some("4"));
        assert_eq!(limits.memory.as_deref(), Some("512m"));
        assert_eq!(task.timeout_seconds, Some(5));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = Worker::builder()
            .broker(Arc::new(InMemoryBroker::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }
}
