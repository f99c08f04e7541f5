//! 媒体引擎接口
//!
//! 控制面通过 [`MediaEngine`] 调用实际的转发引擎：创建/连接 transport、
//! 接收 producer、生成 consumer、回答能力兼容性查询。引擎自己的资源标识为
//! [`EngineHandle`]，与信令层的注册表 ID 相互独立。

use crate::error::Result;
use crate::rtp::{MediaKind, RtpCapabilities, RtpParameters};
use crate::transport::{DtlsParameters, TransportListenOptions, TransportParameters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// 引擎内部的资源句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineHandle(String);

impl EngineHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 引擎创建的 transport
#[derive(Debug, Clone)]
pub struct EngineTransport {
    pub handle: EngineHandle,
    pub parameters: TransportParameters,
}

/// 引擎接收的 producer
#[derive(Debug, Clone)]
pub struct EngineProducer {
    pub handle: EngineHandle,
}

/// 引擎生成的 consumer
#[derive(Debug, Clone)]
pub struct EngineConsumer {
    pub handle: EngineHandle,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

/// 引擎异步上报的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// transport 网络失败（ICE 超时、DTLS 失败等）
    TransportFailed { handle: EngineHandle },
}

/// 媒体转发引擎的资源创建接口
///
/// `close_*` 为同步、幂等调用：对未知句柄静默忽略。
#[async_trait]
pub trait MediaEngine: Send + Sync + fmt::Debug {
    /// 路由能力集（部署启动时确定，之后不变）
    fn rtp_capabilities(&self) -> RtpCapabilities;

    async fn create_transport(&self, options: &TransportListenOptions) -> Result<EngineTransport>;

    /// 执行 DTLS 握手；每个 transport 只能成功调用一次
    async fn connect_transport(
        &self,
        transport: &EngineHandle,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()>;

    async fn produce(
        &self,
        transport: &EngineHandle,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer>;

    fn can_consume(&self, producer: &EngineHandle, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn consume(
        &self,
        transport: &EngineHandle,
        producer: &EngineHandle,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<EngineConsumer>;

    fn close_consumer(&self, consumer: &EngineHandle);

    fn close_producer(&self, producer: &EngineHandle);

    fn close_transport(&self, transport: &EngineHandle);

    /// 订阅引擎事件
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
