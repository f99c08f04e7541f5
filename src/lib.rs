//! # sfu-relay
//!
//! SFU 信令/控制面服务器：WebSocket 信令、能力协商、transport 与
//! producer/consumer 生命周期管理

pub mod error;
pub mod http;
pub mod observability;
pub mod trace;

// Re-export commonly used types
pub use error::{Error, Result};
pub use relay_common::config::RelayConfig;
