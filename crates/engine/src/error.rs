//! 媒体引擎错误类型
//!
//! 引擎拒绝创建/连接资源时返回的错误，信令层统一映射为 `EngineFailure`

use thiserror::Error;

/// 媒体引擎错误枚举
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ========== 资源错误 ==========
    /// 引擎内部找不到指定的 transport 句柄
    #[error("Transport not found in engine: {handle}")]
    TransportNotFound { handle: String },

    /// 引擎内部找不到指定的 producer 句柄
    #[error("Producer not found in engine: {handle}")]
    ProducerNotFound { handle: String },

    /// transport 已经完成 DTLS 连接
    #[error("Transport {handle} is already connected")]
    AlreadyConnected { handle: String },

    // ========== 参数错误 ==========
    /// 监听选项无效（例如 UDP/TCP 均未启用）
    #[error("Invalid transport options: {reason}")]
    InvalidOptions { reason: String },

    /// DTLS 参数无效
    #[error("Invalid DTLS parameters: {reason}")]
    InvalidDtlsParameters { reason: String },

    /// RTP 参数无效
    #[error("Invalid RTP parameters: {reason}")]
    InvalidRtpParameters { reason: String },

    /// 编解码器不被路由能力集支持
    #[error("Unsupported codec {mime_type} ({clock_rate} Hz)")]
    UnsupportedCodec { mime_type: String, clock_rate: u32 },

    /// 接收端能力集与 producer 不兼容
    #[error("Capabilities are incompatible with producer {handle}")]
    IncompatibleCapabilities { handle: String },

    // ========== 运行时错误 ==========
    /// 端口池耗尽
    #[error("No free RTC port left in range {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },
}

impl EngineError {
    /// 创建 RTP 参数错误
    pub fn invalid_rtp(reason: impl Into<String>) -> Self {
        Self::InvalidRtpParameters {
            reason: reason.into(),
        }
    }

    /// 创建 DTLS 参数错误
    pub fn invalid_dtls(reason: impl Into<String>) -> Self {
        Self::InvalidDtlsParameters {
            reason: reason.into(),
        }
    }
}

/// 引擎操作的 Result 类型
pub type Result<T> = std::result::Result<T, EngineError>;
