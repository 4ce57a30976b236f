//! 配置模型与加载
//!
//! 配置来源按优先级从低到高：结构体默认值、TOML 配置文件、
//! `CONDUCTOR_` 前缀的环境变量（层级分隔符为 `__`，例如
//! `CONDUCTOR_BROKER__URL`）。

pub mod models;

pub use models::*;
