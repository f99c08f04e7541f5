//! SFU 信令服务
//!
//! 基于 JSON WebSocket 协议的 SFU 控制面：能力协商、transport 生命周期、
//! producer/consumer 管理与断开清理。媒体转发由 [`media_engine::MediaEngine`] 完成。
//!
//! # 模块结构
//!
//! ## 核心模块
//! - [`routing`]: 部署级能力集 [`RoutingContext`]
//! - [`registry`]: transport / producer / consumer 注册表
//! - [`session`]: 会话与资源归属
//! - [`dispatcher`]: 请求处理与级联释放
//! - [`broadcaster`]: 通知广播
//!
//! ## 接入层
//! - [`protocol`]: JSON 请求/响应/通知
//! - [`server`]: WebSocket 连接处理
//! - [`axum_router`]: Axum 路由
//! - [`ratelimit`]: 连接与消息速率限制

pub mod broadcaster;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod ratelimit;
pub mod registry;
pub mod routing;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

// Axum router integration
pub mod axum_router;

pub use axum_router::{build_signaling_server, signaling_router};

// Re-export commonly used types
pub use broadcaster::EventBroadcaster;
pub use dispatcher::Dispatcher;
pub use error::{ResourceKind, SignalingError};
pub use ids::{ResourceId, SessionId};
pub use registry::{ResourceRegistry, TransportRole, TransportState};
pub use routing::RoutingContext;
pub use server::{SignalingServer, handle_websocket_connection, spawn_engine_watcher};
pub use session::SessionManager;
