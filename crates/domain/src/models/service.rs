use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Port, Probe};

pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    #[default]
    Pending,
    Scheduled,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Pending => "PENDING",
            ServiceState::Scheduled => "SCHEDULED",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopped => "STOPPED",
            ServiceState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// 声明式长期运行服务，namespace + name 唯一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: ServiceState,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub queue: Option<String>,
    pub probe: Probe,
    #[serde(default)]
    pub ports: Vec<Port>,
    /// 最近一次部署作业
    #[serde(default)]
    pub job_id: Option<String>,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            id: String::new(),
            namespace: default_namespace(),
            name: String::new(),
            description: None,
            state: ServiceState::Pending,
            created_at: None,
            image: None,
            run: None,
            env: HashMap::new(),
            files: HashMap::new(),
            queue: None,
            probe: Probe {
                path: "/".to_string(),
                interval_seconds: None,
            },
            ports: Vec::new(),
            job_id: None,
        }
    }
}
