//! 路由上下文
//!
//! 部署级的能力集与 transport 监听选项。启动时由配置生成一次，
//! 之后以 `Arc<RoutingContext>` 注入 dispatcher，运行期间只读。

use anyhow::{Context as _, Result, anyhow};
use media_engine::{MediaKind, RtpCapabilities, RtpCodecCapability, TransportListenOptions};
use relay_common::config::MediaConfig;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct RoutingContext {
    rtp_capabilities: RtpCapabilities,
    listen_options: TransportListenOptions,
}

impl RoutingContext {
    pub fn new(rtp_capabilities: RtpCapabilities, listen_options: TransportListenOptions) -> Self {
        Self {
            rtp_capabilities,
            listen_options,
        }
    }

    /// 路由能力集（getRouterRtpCapabilities 的应答）
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.rtp_capabilities
    }

    pub fn listen_options(&self) -> &TransportListenOptions {
        &self.listen_options
    }
}

/// 将配置中的编码列表转换为引擎的媒体编码
pub fn media_codecs_from_config(config: &MediaConfig) -> Result<Vec<RtpCodecCapability>> {
    config
        .codecs
        .iter()
        .map(|codec| {
            let kind = MediaKind::from_str(&codec.kind)
                .with_context(|| format!("invalid codec kind '{}'", codec.kind))?;
            Ok(RtpCodecCapability {
                kind,
                mime_type: codec.mime_type.clone(),
                preferred_payload_type: codec.preferred_payload_type,
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: Vec::new(),
            })
        })
        .collect()
}

/// 将配置转换为 transport 监听选项
pub fn listen_options_from_config(config: &MediaConfig) -> Result<TransportListenOptions> {
    let listen_ip = config.listen_addr().map_err(|e| anyhow!(e))?;
    let announced_ip = config.announced_addr().map_err(|e| anyhow!(e))?;
    let options = TransportListenOptions {
        listen_ip,
        announced_ip,
        enable_udp: config.enable_udp,
        enable_tcp: config.enable_tcp,
        prefer_udp: config.prefer_udp,
        port_range: (config.rtc_min_port, config.rtc_max_port),
    };
    options.validate()?;
    Ok(options)
}
