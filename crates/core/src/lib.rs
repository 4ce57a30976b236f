pub mod config;
pub mod errors;
pub mod host;
pub mod logging;
pub mod utils;

pub use self::config::*;
pub use errors::*;
pub use host::{hostname, HostSampler};
pub use logging::init_logging;
pub use utils::*;

/// 当前构建版本，随心跳一起上报
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 统一的Result类型
pub type ConductorResult<T> = std::result::Result<T, ConductorError>;
