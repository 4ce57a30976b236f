use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务输出片段
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskLogPart {
    pub id: Option<String>,
    pub number: u64,
    pub task_id: String,
    pub contents: String,
    pub created_at: Option<DateTime<Utc>>,
}
