//! 信令错误模型
//!
//! 每个变体对应一个稳定的线上错误码（[`SignalingError::code`]），
//! 作为触发请求的响应返回给客户端。

use media_engine::EngineError;
use strum::Display;
use thiserror::Error;

/// 错误中涉及的资源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Transport,
    Producer,
    Consumer,
    Session,
}

#[derive(Debug, Error)]
pub enum SignalingError {
    // ========== 资源错误 ==========
    #[error("{kind} {id} not found")]
    ResourceNotFound { kind: ResourceKind, id: String },

    #[error("{kind} {id} belongs to another session")]
    Forbidden { kind: ResourceKind, id: String },

    // ========== 状态错误 ==========
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("receiver capabilities share no codec with producer {producer_id}")]
    NegotiationFailed { producer_id: String },

    // ========== 引擎错误 ==========
    #[error("media engine failure: {0}")]
    EngineFailure(#[from] EngineError),

    // ========== 协议错误 ==========
    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    #[error("rate limited: {reason}")]
    RateLimited { reason: String },
}

impl SignalingError {
    pub fn not_found(kind: ResourceKind, id: impl ToString) -> Self {
        Self::ResourceNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn forbidden(kind: ResourceKind, id: impl ToString) -> Self {
        Self::Forbidden {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// 线上错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "ResourceNotFound",
            Self::Forbidden { .. } => "Forbidden",
            Self::InvalidState { .. } => "InvalidState",
            Self::NegotiationFailed { .. } => "NegotiationFailed",
            Self::EngineFailure(_) => "EngineFailure",
            Self::BadRequest { .. } => "BadRequest",
            Self::RateLimited { .. } => "RateLimited",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            SignalingError::not_found(ResourceKind::Producer, "p1").code(),
            "ResourceNotFound"
        );
        assert_eq!(
            SignalingError::invalid_state("not connected").code(),
            "InvalidState"
        );
        let engine: SignalingError = EngineError::AlreadyConnected {
            handle: "h".to_string(),
        }
        .into();
        assert_eq!(engine.code(), "EngineFailure");
    }

    #[test]
    fn test_messages_name_the_resource() {
        let err = SignalingError::forbidden(ResourceKind::Transport, "t-1");
        assert_eq!(err.to_string(), "transport t-1 belongs to another session");
    }
}
