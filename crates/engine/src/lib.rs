//! 媒体引擎边界
//!
//! 控制面与媒体转发引擎之间的接口层：
//!
//! - [`rtp`]: RTP 能力集/参数模型与兼容性匹配
//! - [`transport`]: ICE/DTLS 参数模型
//! - [`engine`]: [`MediaEngine`] trait 及句柄、事件类型
//! - [`local`]: 进程内引擎实现 [`LocalEngine`]

pub mod engine;
pub mod error;
pub mod local;
pub mod rtp;
pub mod transport;

pub use engine::{
    EngineConsumer, EngineEvent, EngineHandle, EngineProducer, EngineTransport, MediaEngine,
};
pub use error::{EngineError, Result};
pub use local::{LocalEngine, LocalEngineStats};
pub use rtp::{
    MediaKind, RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpParameters,
    default_media_codecs,
};
pub use transport::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceProtocol,
    TransportListenOptions, TransportParameters,
};
