//! 注册表中保存的资源状态

use crate::ids::ResourceId;
use media_engine::{EngineHandle, MediaKind, RtpParameters, TransportParameters};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tokio::sync::Mutex;

/// transport 方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportRole {
    /// 客户端向 SFU 发送媒体（produce）
    Sender,
    /// 客户端从 SFU 接收媒体（consume）
    Receiver,
}

impl TransportRole {
    pub fn from_sender_flag(sender: bool) -> Self {
        if sender { Self::Sender } else { Self::Receiver }
    }
}

/// transport 生命周期：Created → Connecting → Connected → Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportState {
    Created,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Transport {
    pub role: TransportRole,
    pub state: TransportState,
    /// 引擎生成的 ICE/DTLS 参数，原样透传
    pub parameters: TransportParameters,
    pub handle: EngineHandle,
    /// 串行化同一 transport 上的 connect/produce/consume/close
    op_lock: Arc<Mutex<()>>,
}

impl Transport {
    pub fn new(role: TransportRole, handle: EngineHandle, parameters: TransportParameters) -> Self {
        Self {
            role,
            state: TransportState::Created,
            parameters,
            handle,
            op_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn op_lock(&self) -> Arc<Mutex<()>> {
        self.op_lock.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Producer {
    pub transport_id: ResourceId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub handle: EngineHandle,
}

#[derive(Debug, Clone)]
pub struct Consumer {
    pub transport_id: ResourceId,
    pub producer_id: ResourceId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub handle: EngineHandle,
}
