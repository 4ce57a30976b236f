use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use conductor_core::ConductorResult;
use tokio_util::sync::CancellationToken;

use crate::models::{Port, Task};

/// 运行时解析出的端口地址，探测循环与运行时共享
#[derive(Debug, Clone, Default)]
pub struct PortBindings {
    inner: Arc<RwLock<BTreeMap<String, Port>>>,
}

impl PortBindings {
    pub fn bind(&self, port: &str, address: impl Into<String>) {
        if let Ok(mut ports) = self.inner.write() {
            ports.insert(
                port.to_string(),
                Port {
                    port: port.to_string(),
                    address: Some(address.into()),
                },
            );
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Port> {
        self.inner
            .read()
            .map(|ports| ports.clone())
            .unwrap_or_default()
    }

    /// 已解析的地址，按端口名排序
    pub fn addresses(&self) -> Vec<String> {
        self.snapshot()
            .into_values()
            .filter_map(|port| port.address)
            .collect()
    }
}

/// 单次执行的上下文
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// 取消令牌；运行时必须在令牌取消后尽快退出
    pub cancel: CancellationToken,
    pub ports: PortBindings,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ports: PortBindings::default(),
        }
    }
}

/// 任务执行运行时
#[async_trait]
pub trait Runtime: Send + Sync {
    /// 阻塞直到任务结束，结果写回 `task.result`
    async fn run(&self, ctx: &RunContext, task: &mut Task) -> ConductorResult<()>;

    /// 节点自检，决定心跳中的节点状态
    async fn health_check(&self) -> ConductorResult<()>;
}

pub type RuntimeRef = Arc<dyn Runtime>;
