use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_core::{
    hostname, new_id, new_short_id, ConductorError, ConductorResult, CoordinatorConfig,
    HostSampler, VERSION,
};
use conductor_domain::messaging::{
    is_coordinator_queue, BrokerExt, BrokerRef, QueueInfo, COORDINATOR_QUEUES, QUEUE_COMPLETED,
    QUEUE_ERROR, QUEUE_HEARTBEAT, QUEUE_JOBS, QUEUE_LOGS, QUEUE_PENDING, QUEUE_SERVICES,
    QUEUE_STARTED,
};
use conductor_domain::middleware::{apply_middleware, HandlerRef, MiddlewareRef};
use conductor_domain::models::{
    Job, JobState, Node, NodeStatus, Service, ServiceState, Task, TaskLogPart, DEFAULT_NAMESPACE,
};
use conductor_domain::repositories::DatastoreRef;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handlers::{
    CompletedHandler, ErrorHandler, HeartbeatHandler, JobEscalation, JobHandler, LogHandler,
    PendingHandler, ServiceHandler, StartedHandler, TaskEscalation,
};

/// 按实体类型注册的中间件
#[derive(Clone, Default)]
pub struct CoordinatorMiddleware {
    pub task: Vec<MiddlewareRef<Task>>,
    pub job: Vec<MiddlewareRef<Job>>,
    pub service: Vec<MiddlewareRef<Service>>,
    pub node: Vec<MiddlewareRef<Node>>,
}

pub struct CoordinatorBuilder {
    name: String,
    broker: Option<BrokerRef>,
    datastore: Option<DatastoreRef>,
    queues: HashMap<String, usize>,
    heartbeat_interval: Duration,
    shutdown_timeout: Duration,
    middleware: CoordinatorMiddleware,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            name: config.name.clone(),
            broker: None,
            datastore: None,
            queues: config.queues.clone(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
            middleware: CoordinatorMiddleware::default(),
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

    pub fn datastore(mut self, datastore: DatastoreRef) -> Self {
        self.datastore = Some(datastore);
        self
    }

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

    pub fn task_middleware(mut self, middleware: MiddlewareRef<Task>) -> Self {
        self.middleware.task.push(middleware);
        self
    }

    pub fn job_middleware(mut self, middleware: MiddlewareRef<Job>) -> Self {
        self.middleware.job.push(middleware);
        self
    }

    pub fn service_middleware(mut self, middleware: MiddlewareRef<Service>) -> Self {
        self.middleware.service.push(middleware);
        self
    }

    pub fn node_middleware(mut self, middleware: MiddlewareRef<Node>) -> Self {
        self.middleware.node.push(middleware);
        self
    }

    pub fn build(self) -> ConductorResult<Coordinator> {
        let broker = self
            .broker
            .ok_or_else(|| ConductorError::Configuration("必须提供消息代理".to_string()))?;
        let datastore = self
            .datastore
            .ok_or_else(|| ConductorError::Configuration("必须提供数据存储".to_string()))?;

        let mut queues = self.queues;
        for queue in COORDINATOR_QUEUES {
            let concurrency = queues.entry(queue.to_string()).or_insert(1);
            if *concurrency < 1 {
                *concurrency = 1;
            }
        }

        let mw = self.middleware;
        let raw_job: HandlerRef<Job> = Arc::new(JobHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
            mw.task.clone(),
        ));
        let on_job = apply_middleware(Arc::clone(&raw_job), mw.job.clone());

        let fallback_error: HandlerRef<Task> = Arc::new(ErrorHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
            Arc::clone(&raw_job),
        ));
        let escalate = |handler: HandlerRef<Task>| -> HandlerRef<Task> {
            Arc::new(TaskEscalation::new(
                apply_middleware(handler, mw.task.clone()),
                Arc::clone(&fallback_error),
            ))
        };

        let on_pending = escalate(Arc::new(PendingHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
        )));
        let on_started = escalate(Arc::new(StartedHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
            Arc::clone(&on_job),
        )));
        let on_completed = escalate(Arc::new(CompletedHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
            Arc::clone(&on_job),
        )));
        let on_error = escalate(Arc::new(ErrorHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&broker),
            Arc::clone(&on_job),
        )));

        let on_job_message: HandlerRef<Job> =
            Arc::new(JobEscalation::new(Arc::clone(&on_job), Arc::clone(&raw_job)));
        let on_service = apply_middleware(
            Arc::new(ServiceHandler::new(Arc::clone(&datastore), Arc::clone(&raw_job)))
                as HandlerRef<Service>,
            mw.service,
        );
        let on_heartbeat = apply_middleware(
            Arc::new(HeartbeatHandler::new(Arc::clone(&datastore))) as HandlerRef<Node>,
            mw.node,
        );
        let on_log_part: HandlerRef<TaskLogPart> =
            Arc::new(LogHandler::new(Arc::clone(&datastore)));

        Ok(Coordinator {
            id: new_short_id(),
            name: self.name,
            started_at: Utc::now(),
            broker,
            datastore,
            queues,
            on_pending,
            on_started,
            on_completed,
            on_error,
            on_job: on_job_message,
            on_service,
            on_heartbeat,
            on_log_part,
            heartbeat_interval: self.heartbeat_interval,
            shutdown_timeout: self.shutdown_timeout,
            shutdown: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        })
    }
}

/// 协调器：接收作业与服务，驱动其生命周期
pub struct Coordinator {
    id: String,
    name: String,
    started_at: DateTime<Utc>,
    broker: BrokerRef,
    datastore: DatastoreRef,
    queues: HashMap<String, usize>,
    on_pending: HandlerRef<Task>,
    on_started: HandlerRef<Task>,
    on_completed: HandlerRef<Task>,
    on_error: HandlerRef<Task>,
    on_job: HandlerRef<Job>,
    on_service: HandlerRef<Service>,
    on_heartbeat: HandlerRef<Node>,
    on_log_part: HandlerRef<TaskLogPart>,
    heartbeat_interval: Duration,
    shutdown_timeout: Duration,
    shutdown: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 每个协调器队列的订阅并发数
    pub fn queue_concurrency(&self) -> &HashMap<String, usize> {
        &self.queues
    }

    pub async fn start(&self) -> ConductorResult<()> {
        info!("启动协调器 {} ({})", self.name, self.id);

        let mut queues: Vec<(&String, &usize)> = self.queues.iter().collect();
        queues.sort();
        for (queue, concurrency) in queues {
            if !is_coordinator_queue(queue) {
                warn!("队列 {} 不是协调器队列，跳过订阅", queue);
                continue;
            }
            for _ in 0..*concurrency {
                self.subscribe(queue).await?;
            }
            debug!("已订阅队列 {}，并发数 {}", queue, concurrency);
        }

        self.start_heartbeats();
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> ConductorResult<()> {
        let broker = &self.broker;
        match queue {
            QUEUE_PENDING => broker.subscribe_for_tasks(queue, Arc::clone(&self.on_pending)).await,
            QUEUE_STARTED => broker.subscribe_for_tasks(queue, Arc::clone(&self.on_started)).await,
            QUEUE_COMPLETED => {
                broker
                    .subscribe_for_tasks(queue, Arc::clone(&self.on_completed))
                    .await
            }
            QUEUE_ERROR => broker.subscribe_for_tasks(queue, Arc::clone(&self.on_error)).await,
            QUEUE_HEARTBEAT => {
                broker
                    .subscribe_for_heartbeats(Arc::clone(&self.on_heartbeat))
                    .await
            }
            QUEUE_JOBS => broker.subscribe_for_jobs(Arc::clone(&self.on_job)).await,
            QUEUE_SERVICES => {
                broker
                    .subscribe_for_services(Arc::clone(&self.on_service))
                    .await
            }
            QUEUE_LOGS => {
                broker
                    .subscribe_for_log_parts(Arc::clone(&self.on_log_part))
                    .await
            }
            other => Err(ConductorError::Configuration(format!(
                "未知的协调器队列: {other}"
            ))),
        }
    }

    fn start_heartbeats(&self) {
        let broker = Arc::clone(&self.broker);
        let shutdown = self.shutdown.clone();
        let interval = self.heartbeat_interval;
        let id = self.id.clone();
        let name = self.name.clone();
        let started_at = self.started_at;

        let handle = tokio::spawn(async move {
            let mut sampler = HostSampler::new();
            loop {
                let node = Node {
                    id: id.clone(),
                    name: name.clone(),
                    started_at: Some(started_at),
                    last_heartbeat_at: Some(Utc::now()),
                    status: NodeStatus::Up,
                    cpu_percent: sampler.cpu_percent(),
                    hostname: hostname(),
                    version: VERSION.to_string(),
                    ..Default::default()
                };
                match broker.publish_heartbeat(&node).await {
                    Ok(()) => {
                        metrics::counter!("conductor_heartbeats_published_total", "role" => "coordinator")
                            .increment(1);
                    }
                    Err(e) => error!("发布协调器 {} 的心跳失败: {}", id, e),
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("协调器 {} 的心跳循环已停止", id);
        });

        match self.heartbeat.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(_) => warn!("心跳句柄锁已损坏"),
        }
    }

    /// 提交作业：分配ID、初始化上下文、持久化并发布到 jobs 队列
    pub async fn submit_job(&self, mut job: Job) -> ConductorResult<Job> {
        if job.id.is_empty() {
            job.id = new_id();
        }
        job.state = JobState::Pending;
        job.created_at = Some(Utc::now());
        job.task_count = job.tasks.len();
        job.position = 0;
        job.execution.clear();
        job.context.inputs = job.inputs.clone();
        job.context.secrets = job.secrets.clone();
        job.context.job = HashMap::from([
            ("id".to_string(), job.id.clone()),
            ("name".to_string(), job.name.clone()),
        ]);

        self.datastore.create_job(&job).await?;
        self.broker.publish_job(&job).await?;
        info!("作业 {} ({}) 已提交，共 {} 个任务", job.id, job.name, job.task_count);
        Ok(job)
    }

    pub async fn submit_service(&self, mut service: Service) -> ConductorResult<Service> {
        if service.name.trim().is_empty() {
            return Err(ConductorError::InvalidState("服务名称不能为空".to_string()));
        }
        if service.namespace.is_empty() {
            service.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if service.id.is_empty() {
            service.id = new_id();
        }
        service.state = ServiceState::Pending;
        service.created_at = Some(Utc::now());
        service.job_id = None;

        self.datastore.create_service(&service).await?;
        self.broker.publish_service(&service).await?;
        info!("服务 {}/{} 已提交", service.namespace, service.name);
        Ok(service)
    }

    pub async fn cancel_job(&self, job_id: &str) -> ConductorResult<()> {
        let mut job = self.datastore.get_job(job_id).await?;
        if !job.state.is_active() {
            return Err(ConductorError::InvalidState(format!(
                "作业 {} 当前状态为 {}，无法取消",
                job_id, job.state
            )));
        }
        job.state = JobState::Cancelled;
        self.broker.publish_job(&job).await?;
        info!("已请求取消作业 {}", job_id);
        Ok(())
    }

    /// 从失败或取消的位置重新执行作业
    pub async fn restart_job(&self, job_id: &str) -> ConductorResult<Job> {
        let job = self
            .datastore
            .update_job(
                job_id,
                Box::new(|j: &mut Job| {
                    if !matches!(j.state, JobState::Failed | JobState::Cancelled) {
                        return Err(ConductorError::InvalidState(format!(
                            "作业 {} 当前状态为 {}，无法重启",
                            j.id, j.state
                        )));
                    }
                    if j.position >= j.task_count {
                        return Err(ConductorError::InvalidState(format!(
                            "作业 {} 没有可重启的任务",
                            j.id
                        )));
                    }
                    j.state = JobState::Restart;
                    Ok(())
                }),
            )
            .await?;
        self.broker.publish_job(&job).await?;
        info!("已请求重启作业 {}", job_id);
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> ConductorResult<Job> {
        self.datastore.get_job(job_id).await
    }

    pub async fn queues(&self) -> ConductorResult<Vec<QueueInfo>> {
        self.broker.queues().await
    }

    pub async fn stop(&self) -> ConductorResult<()> {
        debug!("关闭协调器 {}", self.name);
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
        info!("协调器 {} 已停止", self.name);
        Ok(())
    }
}
