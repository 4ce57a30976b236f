use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conductor_coordinator::Coordinator;
use conductor_core::AppConfig;
use conductor_domain::messaging::BrokerRef;
use conductor_infrastructure::{create_broker, InMemoryDatastore};
use conductor_worker::{ShellRuntime, Worker};
use tokio::sync::broadcast;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行协调器
    Coordinator,
    /// 仅运行工作节点
    Worker,
    /// 同一进程内运行协调器与工作节点
    Standalone,
}

impl AppMode {
    fn runs_coordinator(self) -> bool {
        matches!(self, AppMode::Coordinator | AppMode::Standalone)
    }

    fn runs_worker(self) -> bool {
        matches!(self, AppMode::Worker | AppMode::Standalone)
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coordinator" => Ok(AppMode::Coordinator),
            "worker" => Ok(AppMode::Worker),
            "standalone" => Ok(AppMode::Standalone),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    broker: BrokerRef,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let broker = create_broker(&config.broker)
            .await
            .context("创建消息代理失败")?;

        Ok(Self {
            config,
            mode,
            broker,
        })
    }

    /// 启动组件，阻塞直到收到关闭信号，然后按 worker → coordinator 的顺序停止
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let coordinator = if self.mode.runs_coordinator() {
            Some(self.start_coordinator().await?)
        } else {
            None
        };

        let worker = if self.mode.runs_worker() {
            Some(self.start_worker().await?)
        } else {
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        if let Some(worker) = worker {
            if let Err(e) = worker.stop().await {
                error!("停止工作节点失败: {}", e);
            }
        }
        if let Some(coordinator) = coordinator {
            coordinator.stop().await.context("停止协调器失败")?;
        }

        info!("所有组件已停止");
        Ok(())
    }

    async fn start_coordinator(&self) -> Result<Coordinator> {
        let coordinator = Coordinator::builder()
            .name(self.config.coordinator.name.clone())
            .broker(Arc::clone(&self.broker))
            .datastore(Arc::new(InMemoryDatastore::new()))
            .heartbeat_interval(Duration::from_secs(
                self.config.coordinator.heartbeat_interval_seconds,
            ))
            .shutdown_timeout(Duration::from_secs(
                self.config.coordinator.shutdown_timeout_seconds,
            ));
        let coordinator = self
            .config
            .coordinator
            .queues
            .iter()
            .fold(coordinator, |builder, (queue, concurrency)| {
                builder.queue(queue.clone(), *concurrency)
            })
            .build()
            .context("创建协调器失败")?;

        coordinator.start().await.context("启动协调器失败")?;
        info!("协调器 {} 已启动", coordinator.name());
        Ok(coordinator)
    }

    async fn start_worker(&self) -> Result<Worker> {
        let runtime = ShellRuntime::new().with_log_broker(Arc::clone(&self.broker));
        let worker = Worker::builder()
            .name(self.config.worker.name.clone())
            .broker(Arc::clone(&self.broker))
            .runtime(Arc::new(runtime))
            .heartbeat_interval(Duration::from_secs(
                self.config.worker.heartbeat_interval_seconds,
            ))
            .limits(self.config.worker.limits.clone())
            .probe(self.config.worker.probe.clone());
        let worker = self
            .config
            .worker
            .queues
            .iter()
            .fold(worker, |builder, (queue, concurrency)| {
                builder.queue(queue.clone(), *concurrency)
            })
            .build()
            .context("创建工作节点失败")?;

        worker.start().await.context("启动工作节点失败")?;
        info!("工作节点 {} ({}) 已启动", worker.name(), worker.id());
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode() {
        assert_eq!("worker".parse::<AppMode>().unwrap(), AppMode::Worker);
        assert!("standalone".parse::<AppMode>().unwrap().runs_worker());
        assert!("standalone".parse::<AppMode>().unwrap().runs_coordinator());
        assert!(!AppMode::Worker.runs_coordinator());
        assert!("dispatcher".parse::<AppMode>().is_err());
    }

    #[tokio::test]
    async fn test_standalone_starts_and_stops() {
        let app = Application::new(AppConfig::default(), AppMode::Standalone)
            .await
            .unwrap();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { app.run(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
