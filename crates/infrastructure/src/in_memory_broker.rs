use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::events::topic_matches;
use conductor_domain::messaging::{Broker, Message, MessageHandlerRef, QueueInfo};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 内存消息代理
///
/// 每个队列是一个无界通道，接收端由该队列的所有订阅循环共享，
/// 从而实现竞争消费；主题订阅各自持有独立通道，实现扇出。
/// 适用于单进程部署与测试。
pub struct InMemoryBroker {
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    topics: Arc<RwLock<Vec<TopicSubscription>>>,
    shutdown: CancellationToken,
    consumers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    /// 使用 Arc 包装接收端，支持多个消费者
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    size: Arc<AtomicUsize>,
    subscribers: Arc<AtomicUsize>,
}

struct TopicSubscription {
    pattern: String,
    sender: mpsc::UnboundedSender<Message>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        info!("Creating in-memory broker");
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(RwLock::new(Vec::new())),
            shutdown: CancellationToken::new(),
            consumers: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn ensure_running(&self) -> ConductorResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ConductorError::MessageQueue(
                "in-memory broker is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// 获取或创建队列通道，返回接收端与计数器
    async fn get_or_create_queue(
        &self,
        queue_name: &str,
    ) -> (
        mpsc::UnboundedSender<Message>,
        Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let mut queues = self.queues.write().await;
        let channels = queues.entry(queue_name.to_string()).or_insert_with(|| {
            debug!("Creating new queue: {}", queue_name);
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueChannels {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
                size: Arc::new(AtomicUsize::new(0)),
                subscribers: Arc::new(AtomicUsize::new(0)),
            }
        });
        (
            channels.sender.clone(),
            Arc::clone(&channels.receiver),
            Arc::clone(&channels.size),
            Arc::clone(&channels.subscribers),
        )
    }

    fn track(&self, handle: JoinHandle<()>) {
        match self.consumers.lock() {
            Ok(mut consumers) => consumers.push(handle),
            Err(_) => warn!("consumer registry poisoned, subscription handle not tracked"),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, queue: &str, message: Message) -> ConductorResult<()> {
        self.ensure_running()?;
        debug!("Publishing message to queue '{}': {}", queue, message.id);

        let (sender, _, size, _) = self.get_or_create_queue(queue).await;
        size.fetch_add(1, Ordering::SeqCst);
        sender.send(message).map_err(|e| {
            size.fetch_sub(1, Ordering::SeqCst);
            error!("Failed to send message to queue '{}': {}", queue, e);
            ConductorError::MessageQueue(format!("Failed to send message to queue '{queue}': {e}"))
        })?;

        metrics::counter!("conductor_broker_published_total", "queue" => queue.to_string())
            .increment(1);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: MessageHandlerRef) -> ConductorResult<()> {
        self.ensure_running()?;
        let (_, receiver, size, subscribers) = self.get_or_create_queue(queue).await;
        subscribers.fetch_add(1, Ordering::SeqCst);
        debug!("Subscribing to queue '{}'", queue);

        let shutdown = self.shutdown.clone();
        let queue_name = queue.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let message = {
                    let mut rx = receiver.lock().await;
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        message = rx.recv() => message,
                    }
                };
                let Some(message) = message else {
                    break;
                };
                size.fetch_sub(1, Ordering::SeqCst);
                if let Err(e) = handler.handle(message).await {
                    error!("Error handling message from queue '{}': {}", queue_name, e);
                }
            }
            subscribers.fetch_sub(1, Ordering::SeqCst);
            debug!("Subscription loop for queue '{}' stopped", queue_name);
        });
        self.track(handle);
        Ok(())
    }

    async fn publish_event(&self, topic: &str, message: Message) -> ConductorResult<()> {
        self.ensure_running()?;
        let topics = self.topics.read().await;
        for subscription in topics.iter().filter(|s| topic_matches(&s.pattern, topic)) {
            if subscription.sender.send(message.clone()).is_err() {
                debug!(
                    "Event subscriber for pattern '{}' is gone",
                    subscription.pattern
                );
            }
        }
        Ok(())
    }

    async fn subscribe_for_events(
        &self,
        pattern: &str,
        handler: MessageHandlerRef,
    ) -> ConductorResult<()> {
        self.ensure_running()?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        self.topics.write().await.push(TopicSubscription {
            pattern: pattern.to_string(),
            sender,
        });

        let shutdown = self.shutdown.clone();
        let pattern = pattern.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    message = receiver.recv() => message,
                };
                let Some(message) = message else {
                    break;
                };
                if let Err(e) = handler.handle(message).await {
                    error!("Error handling event for pattern '{}': {}", pattern, e);
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    async fn queues(&self) -> ConductorResult<Vec<QueueInfo>> {
        let queues = self.queues.read().await;
        let mut infos: Vec<QueueInfo> = queues
            .iter()
            .map(|(name, channels)| QueueInfo {
                name: name.clone(),
                size: channels.size.load(Ordering::SeqCst),
                subscribers: channels.subscribers.load(Ordering::SeqCst),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn health_check(&self) -> ConductorResult<()> {
        self.ensure_running()
    }

    async fn shutdown(&self) -> ConductorResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        info!("Shutting down in-memory broker");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = match self.consumers.lock() {
            Ok(mut consumers) => consumers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Subscription loop ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}
