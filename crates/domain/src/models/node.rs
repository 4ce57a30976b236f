use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Up,
    Down,
}

/// 协调器或工作节点的心跳快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub cpu_percent: f64,
    /// 工作节点的专属队列
    pub queue: Option<String>,
    pub task_count: u32,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub version: String,
}
