//! 媒体引擎配置
//!
//! transport 监听选项与路由编码列表。路由编码在启动时一次性生成
//! RoutingContext，运行期间不可变。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// 媒体引擎配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    /// transport 绑定地址
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// 对外宣告的地址（写入 ICE 候选）
    ///
    /// 不配置时直接使用 listen_ip。
    #[serde(default = "default_announced_ip")]
    pub announced_ip: Option<String>,

    #[serde(default = "default_true")]
    pub enable_udp: bool,

    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    #[serde(default = "default_true")]
    pub prefer_udp: bool,

    /// RTC 端口范围下限
    #[serde(default = "default_rtc_min_port")]
    pub rtc_min_port: u16,

    /// RTC 端口范围上限
    #[serde(default = "default_rtc_max_port")]
    pub rtc_max_port: u16,

    /// 路由支持的媒体编码
    #[serde(default = "default_codecs")]
    pub codecs: Vec<MediaCodecConfig>,
}

/// 单个路由编码
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MediaCodecConfig {
    /// "audio" 或 "video"
    pub kind: String,
    /// 如 "audio/opus"、"video/VP8"
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    /// 编码参数（如 H264 的 packetization-mode）
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_announced_ip() -> Option<String> {
    Some("127.0.0.1".to_string())
}

fn default_rtc_min_port() -> u16 {
    40000
}

fn default_rtc_max_port() -> u16 {
    49999
}

fn default_codecs() -> Vec<MediaCodecConfig> {
    vec![
        MediaCodecConfig {
            kind: "audio".to_string(),
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: Some(2),
            preferred_payload_type: None,
            parameters: BTreeMap::new(),
        },
        MediaCodecConfig {
            kind: "video".to_string(),
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: None,
            preferred_payload_type: None,
            parameters: BTreeMap::new(),
        },
    ]
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            announced_ip: default_announced_ip(),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            rtc_min_port: default_rtc_min_port(),
            rtc_max_port: default_rtc_max_port(),
            codecs: default_codecs(),
        }
    }
}

impl MediaConfig {
    /// 解析后的绑定地址
    pub fn listen_addr(&self) -> Result<IpAddr, String> {
        self.listen_ip
            .parse()
            .map_err(|e| format!("Invalid media.listen_ip '{}': {e}", self.listen_ip))
    }

    /// 解析后的宣告地址
    pub fn announced_addr(&self) -> Result<Option<IpAddr>, String> {
        self.announced_ip
            .as_deref()
            .map(|ip| {
                ip.parse()
                    .map_err(|e| format!("Invalid media.announced_ip '{ip}': {e}"))
            })
            .transpose()
    }

    pub fn validate(&self, production: bool) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.listen_addr() {
            errors.push(e);
        }
        match self.announced_addr() {
            Ok(Some(ip)) if production && ip.is_loopback() => errors.push(format!(
                "Warning: media.announced_ip {ip} is a loopback address, remote clients cannot reach it"
            )),
            Ok(_) => {}
            Err(e) => errors.push(e),
        }

        if !self.enable_udp && !self.enable_tcp {
            errors.push("media: at least one of enable_udp / enable_tcp must be true".to_string());
        }

        if self.rtc_min_port == 0 || self.rtc_min_port > self.rtc_max_port {
            errors.push(format!(
                "Invalid RTC port range {}-{}",
                self.rtc_min_port, self.rtc_max_port
            ));
        }

        if self.codecs.is_empty() {
            errors.push("media.codecs must contain at least one codec".to_string());
        }

        let mut payload_types: Vec<u8> = Vec::new();
        for codec in &self.codecs {
            if let Some(pt) = codec.preferred_payload_type {
                if !(96..=127).contains(&pt) {
                    errors.push(format!(
                        "Codec {} preferred_payload_type {pt} is outside the dynamic range 96-127",
                        codec.mime_type
                    ));
                } else if payload_types.contains(&pt) {
                    errors.push(format!(
                        "Codec {} reuses preferred_payload_type {pt}",
                        codec.mime_type
                    ));
                } else {
                    payload_types.push(pt);
                }
            }
            if !["audio", "video"].contains(&codec.kind.as_str()) {
                errors.push(format!(
                    "Invalid codec kind '{}' for {}, must be 'audio' or 'video'",
                    codec.kind, codec.mime_type
                ));
                continue;
            }
            let prefix_matches = codec
                .mime_type
                .split_once('/')
                .is_some_and(|(prefix, _)| prefix.eq_ignore_ascii_case(&codec.kind));
            if !prefix_matches {
                errors.push(format!(
                    "Codec mime_type '{}' does not match kind '{}'",
                    codec.mime_type, codec.kind
                ));
            }
            if codec.clock_rate == 0 {
                errors.push(format!("Codec {} has zero clock_rate", codec.mime_type));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
