use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use conductor_domain::messaging::{
    is_exclusive_queue, Broker, Message, MessageHandlerRef, QueueInfo,
};
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 事件使用的主题交换机
const EVENTS_EXCHANGE: &str = "amq.topic";

/// RabbitMQ消息代理实现
///
/// 普通队列持久化声明；`x-` 前缀的节点专属队列非持久、自动删除，
/// 且不独占，其他连接仍可向其发布。
/// 每个订阅使用独立通道并设置 prefetch=1，保证竞争消费时每个槽位只有一条在途消息。
pub struct RabbitMqBroker {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    declared: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl RabbitMqBroker {
    /// 创建新的RabbitMQ代理实例
    pub async fn new(url: &str) -> ConductorResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            declared: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// 声明队列，已声明过的队列直接跳过
    async fn declare_queue(&self, channel: &Channel, queue_name: &str) -> ConductorResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue_name) {
            return Ok(());
        }

        let exclusive = is_exclusive_queue(queue_name);
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: !exclusive,
                    exclusive: false,
                    auto_delete: exclusive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ConductorError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        declared.insert(queue_name.to_string());
        debug!("队列 {} 声明成功", queue_name);
        Ok(())
    }

    async fn create_consumer(
        &self,
        channel: &Channel,
        queue: &str,
    ) -> ConductorResult<Consumer> {
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("设置prefetch失败: {e}")))?;

        let consumer_tag = format!("conductor-{}", conductor_core::new_short_id());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("创建消费者失败: {e}")))?;

        debug!("为队列 {} 创建消费者: {}", queue, consumer_tag);
        Ok(consumer)
    }

    fn spawn_consumer(
        &self,
        channel: Channel,
        mut consumer: Consumer,
        source: String,
        handler: MessageHandlerRef,
    ) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    delivery = consumer.next() => delivery,
                };
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!("从 {} 接收消息失败: {}", source, e);
                        continue;
                    }
                    None => break,
                };

                let outcome = match serde_json::from_slice::<Message>(&delivery.data) {
                    Ok(message) => handler.handle(message).await,
                    Err(e) => Err(e.into()),
                };

                let ack = match outcome {
                    Ok(()) => {
                        channel
                            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                            .await
                    }
                    Err(e) => {
                        error!("处理来自 {} 的消息失败: {}", source, e);
                        channel
                            .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: false })
                            .await
                    }
                };
                if let Err(e) = ack {
                    warn!("确认消息失败: {}", e);
                }
            }
            debug!("{} 的消费循环已停止", source);
        });
    }

    async fn publish_raw(&self, exchange: &str, routing_key: &str, message: &Message) -> ConductorResult<()> {
        let payload = serde_json::to_vec(message)?;
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2), // 2 = persistent
            )
            .await
            .map_err(|e| {
                ConductorError::MessageQueue(format!("发布消息到 {routing_key} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn publish(&self, queue: &str, message: Message) -> ConductorResult<()> {
        {
            let channel = self.channel.lock().await;
            self.declare_queue(&channel, queue).await?;
        }
        self.publish_raw("", queue, &message).await?;

        metrics::counter!("conductor_broker_published_total", "queue" => queue.to_string())
            .increment(1);
        debug!("消息已发布到队列: {}", queue);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: MessageHandlerRef) -> ConductorResult<()> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("创建通道失败: {e}")))?;
        self.declare_queue(&channel, queue).await?;

        let consumer = self.create_consumer(&channel, queue).await?;
        self.spawn_consumer(channel, consumer, queue.to_string(), handler);
        Ok(())
    }

    async fn publish_event(&self, topic: &str, message: Message) -> ConductorResult<()> {
        self.publish_raw(EVENTS_EXCHANGE, topic, &message).await
    }

    async fn subscribe_for_events(
        &self,
        pattern: &str,
        handler: MessageHandlerRef,
    ) -> ConductorResult<()> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("创建通道失败: {e}")))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("声明事件队列失败: {e}")))?;
        let queue_name = queue.name().as_str().to_string();

        channel
            .queue_bind(
                &queue_name,
                EVENTS_EXCHANGE,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("绑定事件队列失败: {e}")))?;

        let consumer = self.create_consumer(&channel, &queue_name).await?;
        self.spawn_consumer(channel, consumer, format!("events:{pattern}"), handler);
        Ok(())
    }

    async fn queues(&self) -> ConductorResult<Vec<QueueInfo>> {
        let names: Vec<String> = self.declared.lock().await.iter().cloned().collect();
        let channel = self.channel.lock().await;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let queue = channel
                .queue_declare(
                    &name,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| ConductorError::MessageQueue(format!("查询队列 {name} 失败: {e}")))?;
            infos.push(QueueInfo {
                name,
                size: queue.message_count() as usize,
                subscribers: queue.consumer_count() as usize,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn health_check(&self) -> ConductorResult<()> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(ConductorError::MessageQueue("RabbitMQ连接已断开".to_string()))
        }
    }

    async fn shutdown(&self) -> ConductorResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| ConductorError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
