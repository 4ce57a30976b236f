use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub name: String,
    /// 队列名 -> 并发订阅数
    pub queues: HashMap<String, usize>,
    pub heartbeat_interval_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "coordinator".to_string(),
            queues: HashMap::new(),
            heartbeat_interval_seconds: 30,
            shutdown_timeout_seconds: 15,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("Coordinator名称不能为空"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }

        if let Some(name) = self.queues.keys().find(|name| name.is_empty()) {
            return Err(anyhow::anyhow!("队列名称不能为空: {:?}", name));
        }

        Ok(())
    }
}

/// 节点级默认资源限制，任务自身声明的值优先
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerLimits {
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// 服务任务健康探测参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_seconds: 2,
            request_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    /// 队列名 -> 并发订阅数
    pub queues: HashMap<String, usize>,
    pub heartbeat_interval_seconds: u64,
    pub limits: WorkerLimits,
    pub probe: ProbeConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            queues: HashMap::from([("default".to_string(), 1)]),
            heartbeat_interval_seconds: 30,
            limits: WorkerLimits::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("Worker名称不能为空"));
        }

        if self.queues.is_empty() {
            return Err(anyhow::anyhow!("Worker至少需要订阅一个队列"));
        }

        for (queue, concurrency) in &self.queues {
            if queue.is_empty() {
                return Err(anyhow::anyhow!("队列名称不能为空"));
            }
            if *concurrency == 0 {
                return Err(anyhow::anyhow!("队列 {} 的并发数必须大于0", queue));
            }
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.limits.timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("默认任务超时时间必须大于0"));
        }

        if self.probe.max_attempts == 0 {
            return Err(anyhow::anyhow!("健康探测次数必须大于0"));
        }

        if self.probe.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("健康探测请求超时时间必须大于0"));
        }

        Ok(())
    }
}
