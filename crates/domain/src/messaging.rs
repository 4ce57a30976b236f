use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{new_id, ConductorResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::Event;
use crate::middleware::{EventType, HandlerRef};
use crate::models::{Job, Node, Service, Task, TaskLogPart};

pub const QUEUE_PENDING: &str = "pending";
pub const QUEUE_STARTED: &str = "started";
pub const QUEUE_COMPLETED: &str = "completed";
pub const QUEUE_ERROR: &str = "error";
pub const QUEUE_HEARTBEAT: &str = "heartbeat";
pub const QUEUE_JOBS: &str = "jobs";
pub const QUEUE_SERVICES: &str = "services";
pub const QUEUE_LOGS: &str = "logs";
/// 未指定队列的任务投递到这里
pub const QUEUE_DEFAULT: &str = "default";
/// 节点专属队列前缀，用于取消信号
pub const QUEUE_EXCLUSIVE_PREFIX: &str = "x-";

pub const COORDINATOR_QUEUES: [&str; 8] = [
    QUEUE_PENDING,
    QUEUE_STARTED,
    QUEUE_COMPLETED,
    QUEUE_ERROR,
    QUEUE_HEARTBEAT,
    QUEUE_JOBS,
    QUEUE_SERVICES,
    QUEUE_LOGS,
];

pub fn is_coordinator_queue(queue: &str) -> bool {
    COORDINATOR_QUEUES.contains(&queue)
}

pub fn is_exclusive_queue(queue: &str) -> bool {
    queue.starts_with(QUEUE_EXCLUSIVE_PREFIX)
}

/// 工作节点可以订阅的任务队列
pub fn is_worker_queue(queue: &str) -> bool {
    !queue.is_empty() && !is_coordinator_queue(queue) && !is_exclusive_queue(queue)
}

/// 节点专属队列名
pub fn exclusive_queue(node_id: &str) -> String {
    format!("{QUEUE_EXCLUSIVE_PREFIX}{node_id}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Job,
    Node,
    Service,
    LogPart,
    Event,
}

/// 队列上传输的消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    /// 实体ID，便于日志关联
    pub correlation_id: Option<String>,
}

impl Message {
    fn wrap<T: Serialize>(
        message_type: MessageType,
        entity: &T,
        correlation_id: Option<String>,
    ) -> ConductorResult<Self> {
        Ok(Self {
            id: new_id(),
            message_type,
            payload: serde_json::to_value(entity)?,
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id,
        })
    }

    pub fn task(task: &Task) -> ConductorResult<Self> {
        Self::wrap(MessageType::Task, task, Some(task.id.clone()))
    }

    pub fn job(job: &Job) -> ConductorResult<Self> {
        Self::wrap(MessageType::Job, job, Some(job.id.clone()))
    }

    pub fn node(node: &Node) -> ConductorResult<Self> {
        Self::wrap(MessageType::Node, node, Some(node.id.clone()))
    }

    pub fn service(service: &Service) -> ConductorResult<Self> {
        Self::wrap(MessageType::Service, service, Some(service.id.clone()))
    }

    pub fn log_part(part: &TaskLogPart) -> ConductorResult<Self> {
        Self::wrap(MessageType::LogPart, part, Some(part.task_id.clone()))
    }

    pub fn event(event: &Event) -> ConductorResult<Self> {
        Self::wrap(MessageType::Event, event, Some(event.topic.clone()))
    }

    /// 解码负载
    pub fn decode<T: DeserializeOwned>(&self) -> ConductorResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn message_type_str(&self) -> &'static str {
        match self.message_type {
            MessageType::Task => "task",
            MessageType::Job => "job",
            MessageType::Node => "node",
            MessageType::Service => "service",
            MessageType::LogPart => "log_part",
            MessageType::Event => "event",
        }
    }
}

/// 队列层面的消息处理器
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> ConductorResult<()>;
}

pub type MessageHandlerRef = Arc<dyn MessageHandler>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub size: usize,
    pub subscribers: usize,
}

/// 消息代理契约
///
/// 队列语义：同一队列上的多个订阅者竞争消费，每条消息至少投递一次。
/// 主题语义：每个匹配的订阅者都会收到事件。
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, message: Message) -> ConductorResult<()>;

    /// 为队列增加一个消费槽位；同一队列调用 N 次即 N 个并发处理器
    async fn subscribe(&self, queue: &str, handler: MessageHandlerRef) -> ConductorResult<()>;

    async fn publish_event(&self, topic: &str, message: Message) -> ConductorResult<()>;

    async fn subscribe_for_events(
        &self,
        pattern: &str,
        handler: MessageHandlerRef,
    ) -> ConductorResult<()>;

    async fn queues(&self) -> ConductorResult<Vec<QueueInfo>>;

    async fn health_check(&self) -> ConductorResult<()>;

    async fn shutdown(&self) -> ConductorResult<()>;
}

pub type BrokerRef = Arc<dyn Broker>;

/// 把队列消息解码为实体后交给实体处理器
pub struct EntityMessageHandler<T: Send + 'static> {
    event: EventType,
    inner: HandlerRef<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> EntityMessageHandler<T> {
    pub fn new(event: EventType, inner: HandlerRef<T>) -> Self {
        Self {
            event,
            inner,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> MessageHandler for EntityMessageHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn handle(&self, message: Message) -> ConductorResult<()> {
        debug!(
            "收到{}消息: id={}, correlation_id={:?}",
            message.message_type_str(),
            message.id,
            message.correlation_id
        );
        let mut entity: T = message.decode()?;
        self.inner.handle(self.event, &mut entity).await
    }
}

fn entity_handler<T>(event: EventType, handler: HandlerRef<T>) -> MessageHandlerRef
where
    T: DeserializeOwned + Send + 'static,
{
    Arc::new(EntityMessageHandler::new(event, handler))
}

/// 按实体类型封装的发布/订阅操作
#[async_trait]
pub trait BrokerExt: Broker {
    async fn publish_task(&self, queue: &str, task: &Task) -> ConductorResult<()> {
        self.publish(queue, Message::task(task)?).await
    }

    async fn subscribe_for_tasks(
        &self,
        queue: &str,
        handler: HandlerRef<Task>,
    ) -> ConductorResult<()> {
        self.subscribe(queue, entity_handler(EventType::StateChange, handler))
            .await
    }

    async fn publish_heartbeat(&self, node: &Node) -> ConductorResult<()> {
        self.publish(QUEUE_HEARTBEAT, Message::node(node)?).await
    }

    async fn subscribe_for_heartbeats(&self, handler: HandlerRef<Node>) -> ConductorResult<()> {
        self.subscribe(QUEUE_HEARTBEAT, entity_handler(EventType::Heartbeat, handler))
            .await
    }

    async fn publish_job(&self, job: &Job) -> ConductorResult<()> {
        self.publish(QUEUE_JOBS, Message::job(job)?).await
    }

    async fn subscribe_for_jobs(&self, handler: HandlerRef<Job>) -> ConductorResult<()> {
        self.subscribe(QUEUE_JOBS, entity_handler(EventType::StateChange, handler))
            .await
    }

    async fn publish_service(&self, service: &Service) -> ConductorResult<()> {
        self.publish(QUEUE_SERVICES, Message::service(service)?)
            .await
    }

    async fn subscribe_for_services(&self, handler: HandlerRef<Service>) -> ConductorResult<()> {
        self.subscribe(QUEUE_SERVICES, entity_handler(EventType::StateChange, handler))
            .await
    }

    async fn publish_log_part(&self, part: &TaskLogPart) -> ConductorResult<()> {
        self.publish(QUEUE_LOGS, Message::log_part(part)?).await
    }

    async fn subscribe_for_log_parts(
        &self,
        handler: HandlerRef<TaskLogPart>,
    ) -> ConductorResult<()> {
        self.subscribe(QUEUE_LOGS, entity_handler(EventType::StateChange, handler))
            .await
    }

    async fn emit_event(&self, topic: &str, payload: serde_json::Value) -> ConductorResult<()> {
        let event = Event::new(topic, payload);
        self.publish_event(topic, Message::event(&event)?).await
    }

    async fn subscribe_events(&self, pattern: &str, handler: HandlerRef<Event>) -> ConductorResult<()> {
        self.subscribe_for_events(pattern, entity_handler(EventType::StateChange, handler))
            .await
    }
}

impl<B: Broker + ?Sized> BrokerExt for B {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_classification() {
        assert!(is_coordinator_queue(QUEUE_COMPLETED));
        assert!(!is_worker_queue(QUEUE_COMPLETED));
        assert!(is_exclusive_queue("x-abc"));
        assert!(!is_worker_queue("x-abc"));
        assert!(is_worker_queue(QUEUE_DEFAULT));
        assert!(is_worker_queue("gpu"));
        assert_eq!(exclusive_queue("n1"), "x-n1");
    }

    #[test]
    fn test_task_message_roundtrip_keeps_correlation() {
        let task = Task {
            id: "t1".into(),
            name: "compile".into(),
            ..Default::default()
        };
        let message = Message::task(&task).unwrap();
        assert_eq!(message.message_type, MessageType::Task);
        assert_eq!(message.correlation_id.as_deref(), Some("t1"));
        let decoded: Task = message.decode().unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_decode_wrong_payload_is_serialization_error() {
        let node = Node {
            id: "n1".into(),
            ..Default::default()
        };
        let message = Message::node(&node).unwrap();
        let result: ConductorResult<Vec<u8>> = message.decode();
        assert!(matches!(
            result,
            Err(conductor_core::ConductorError::Serialization(_))
        ));
    }
}
