use thiserror::Error;

/// 编排引擎错误类型定义
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("数据存储错误: {0}")]
    Datastore(String),

    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("服务未找到: {namespace}/{name}")]
    ServiceNotFound { namespace: String, name: String },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("无效状态: {0}")]
    InvalidState(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("任务已取消")]
    Cancelled,

    #[error("Health check failed")]
    HealthCheckFailed,

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ConductorError {
    /// 是否为实体不存在类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConductorError::JobNotFound { .. }
                | ConductorError::TaskNotFound { .. }
                | ConductorError::ServiceNotFound { .. }
                | ConductorError::NodeNotFound { .. }
        )
    }
}
