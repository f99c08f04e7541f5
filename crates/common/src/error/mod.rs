//! 错误处理模块
//!
//! 按概念分离的错误类型定义，遵循一个文件一个核心概念的原则

mod base_error;
mod config_error;
mod network_error;
mod serialization_error;

pub use base_error::{BaseError, Result};
pub use config_error::ConfigError;
pub use network_error::NetworkError;
pub use serialization_error::SerializationError;
