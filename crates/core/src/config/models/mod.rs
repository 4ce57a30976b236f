pub mod app_config;
pub mod broker;
pub mod coordinator_worker;
pub mod logging_observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use broker::{BrokerConfig, BrokerType};
pub use coordinator_worker::{CoordinatorConfig, ProbeConfig, WorkerConfig, WorkerLimits};
pub use logging_observability::{LogFormat, LoggingConfig, ObservabilityConfig};
