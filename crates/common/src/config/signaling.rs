//! Signaling 服务配置

use serde::{Deserialize, Serialize};

/// Signaling 服务配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// WebSocket 路径（挂载在 /signaling 之下）
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// 速率限制配置
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// 速率限制配置
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RateLimitConfig {
    /// 连接速率限制配置
    #[serde(default)]
    pub connection: ConnectionRateLimit,

    /// 消息速率限制配置
    #[serde(default)]
    pub message: MessageRateLimit,
}

/// 连接速率限制配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionRateLimit {
    /// 是否启用连接速率限制
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 每分钟允许的新连接数
    #[serde(default = "default_connections_per_minute")]
    pub per_minute: u32,

    /// 突发允许的连接数
    #[serde(default = "default_connection_burst")]
    pub burst_size: u32,

    /// 每个 IP 的最大并发连接数
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_per_ip: u32,
}

/// 消息速率限制配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageRateLimit {
    /// 是否启用消息速率限制
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 每秒允许的消息数
    #[serde(default = "default_messages_per_second")]
    pub per_second: u32,

    /// 突发允许的消息数
    #[serde(default = "default_message_burst")]
    pub burst_size: u32,
}

// 默认值函数
fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_connections_per_minute() -> u32 {
    30
}

fn default_connection_burst() -> u32 {
    10
}

fn default_max_concurrent_connections() -> u32 {
    100
}

fn default_messages_per_second() -> u32 {
    20
}

fn default_message_burst() -> u32 {
    50
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for ConnectionRateLimit {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            per_minute: default_connections_per_minute(),
            burst_size: default_connection_burst(),
            max_concurrent_per_ip: default_max_concurrent_connections(),
        }
    }
}

impl Default for MessageRateLimit {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            per_second: default_messages_per_second(),
            burst_size: default_message_burst(),
        }
    }
}

impl SignalingConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.ws_path.starts_with('/') || self.ws_path.len() < 2 {
            errors.push(format!(
                "Invalid signaling.ws_path '{}', must start with '/' and not be the root",
                self.ws_path
            ));
        }

        let connection = &self.rate_limit.connection;
        if connection.enabled
            && (connection.per_minute == 0
                || connection.burst_size == 0
                || connection.max_concurrent_per_ip == 0)
        {
            errors.push(
                "signaling.rate_limit.connection: per_minute, burst_size and max_concurrent_per_ip must be positive"
                    .to_string(),
            );
        }

        let message = &self.rate_limit.message;
        if message.enabled && (message.per_second == 0 || message.burst_size == 0) {
            errors.push(
                "signaling.rate_limit.message: per_second and burst_size must be positive"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
