//! 通用基础设施库
//!
//! 为 sfu-relay 各 crate 提供配置模型与基础错误类型

pub mod config;
pub mod error;

pub use config::{
    BindConfig, HttpBindConfig, MediaCodecConfig, MediaConfig, RelayConfig, SignalingConfig,
};
pub use error::{BaseError, ConfigError, NetworkError, Result, SerializationError};
