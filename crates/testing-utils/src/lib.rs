//! # Conductor Testing Utils
//!
//! 工作区共享的测试工具：实体构建器、可编排的模拟运行时与异步等待辅助。
//!
//! ```toml
//! [dev-dependencies]
//! conductor-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
