pub mod http;

pub use crate::config::bind::http::HttpBindConfig;
use serde::{Deserialize, Serialize};

/// 网络绑定配置
///
/// 信令 WebSocket 与健康检查共用同一个 HTTP 监听地址。
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BindConfig {
    /// HTTP 服务绑定配置
    #[serde(default)]
    pub http: HttpBindConfig,
}

impl BindConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        self.http.validate()
    }
}
