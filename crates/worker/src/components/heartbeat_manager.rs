use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_core::{hostname, HostSampler, VERSION};
use conductor_domain::messaging::{exclusive_queue, BrokerExt, BrokerRef};
use conductor_domain::models::{Node, NodeStatus};
use conductor_domain::runtime::RuntimeRef;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// 周期性发布工作节点心跳，节点状态取决于运行时自检结果
pub struct HeartbeatManager {
    worker_id: String,
    worker_name: String,
    started_at: DateTime<Utc>,
    broker: BrokerRef,
    runtime: RuntimeRef,
    live: Arc<AtomicUsize>,
    interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: String,
        worker_name: String,
        broker: BrokerRef,
        runtime: RuntimeRef,
        live: Arc<AtomicUsize>,
        interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            worker_name,
            started_at: Utc::now(),
            broker,
            runtime,
            live,
            interval,
        }
    }

    async fn status(&self) -> NodeStatus {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.runtime.health_check()).await {
            Ok(Ok(())) => NodeStatus::Up,
            Ok(Err(e)) => {
                error!("节点 {} 健康检查失败: {}", self.worker_id, e);
                NodeStatus::Down
            }
            Err(_) => {
                error!("节点 {} 健康检查超时", self.worker_id);
                NodeStatus::Down
            }
        }
    }

    pub async fn snapshot(&self, sampler: &mut HostSampler) -> Node {
        Node {
            id: self.worker_id.clone(),
            name: self.worker_name.clone(),
            started_at: Some(self.started_at),
            last_heartbeat_at: Some(Utc::now()),
            status: self.status().await,
            cpu_percent: sampler.cpu_percent(),
            queue: Some(exclusive_queue(&self.worker_id)),
            task_count: self.live.load(Ordering::SeqCst) as u32,
            hostname: hostname(),
            port: None,
            version: VERSION.to_string(),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sampler = HostSampler::new();
            loop {
                let node = self.snapshot(&mut sampler).await;
                match self.broker.publish_heartbeat(&node).await {
                    Ok(()) => {
                        metrics::counter!("conductor_heartbeats_published_total", "role" => "worker")
                            .increment(1);
                    }
                    Err(e) => error!("发布节点 {} 的心跳失败: {}", self.worker_id, e),
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            debug!("节点 {} 的心跳循环已停止", self.worker_id);
        })
    }
}
