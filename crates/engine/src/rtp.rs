//! RTP 能力与参数模型
//!
//! 字段命名与 mediasoup-client 的 JSON 结构保持一致（camelCase），
//! 控制面只做能力匹配，不解析媒体码流。

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// 第一个自动分配的动态负载类型
const DYNAMIC_PAYLOAD_TYPE_START: u8 = 100;

/// RTP 动态负载类型范围
const DYNAMIC_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 96..=127;

/// 媒体类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// 根据 MIME 前缀推断媒体类型（`audio/opus` -> Audio）
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let (prefix, _) = mime_type.split_once('/')?;
        if prefix.eq_ignore_ascii_case("audio") {
            Some(Self::Audio)
        } else if prefix.eq_ignore_ascii_case("video") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameter: String,
}

impl RtcpFeedback {
    fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// 编解码器能力（路由能力集或接收端能力集中的一项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime(&self.mime_type)
    }

    /// 判断一个 producer 编码是否能由本能力项承载
    pub fn matches(&self, codec: &RtpCodecParameters) -> bool {
        codecs_match(
            (&self.mime_type, self.clock_rate, self.channels, &self.parameters),
            (&codec.mime_type, codec.clock_rate, codec.channels, &codec.parameters),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub uri: String,
    pub preferred_id: u16,
}

/// 能力集：路由端支持的编码，或接收端声明的接收能力
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime(&self.mime_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u16,
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_reduced_size")]
    pub reduced_size: bool,
}

fn default_reduced_size() -> bool {
    true
}

/// 一路媒体流的协商参数（producer 发送 / consumer 接收）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<RtcpParameters>,
}

impl RtpParameters {
    /// 非 RTX 的媒体编码
    pub fn media_codecs(&self) -> impl Iterator<Item = &RtpCodecParameters> {
        self.codecs.iter().filter(|codec| !codec.is_rtx())
    }
}

impl RtpCapabilities {
    /// 由部署配置的媒体编码生成路由能力集
    ///
    /// 未指定 `preferred_payload_type` 的编码从 100 开始分配动态负载类型，
    /// 每个视频编码附带一个 RTX 编码（`apt` 指向原编码）。
    pub fn from_media_codecs(media_codecs: &[RtpCodecCapability]) -> Result<Self> {
        if media_codecs.is_empty() {
            return Err(EngineError::invalid_rtp("at least one media codec is required"));
        }

        let mut used: Vec<u8> = Vec::with_capacity(media_codecs.len() * 2);
        for codec in media_codecs {
            let Some(pt) = codec.preferred_payload_type else {
                continue;
            };
            if !DYNAMIC_PAYLOAD_TYPES.contains(&pt) {
                return Err(EngineError::invalid_rtp(format!(
                    "payload type {pt} of {} is outside the dynamic range 96-127",
                    codec.mime_type
                )));
            }
            if used.contains(&pt) {
                return Err(EngineError::invalid_rtp(format!(
                    "payload type {pt} is configured for more than one codec"
                )));
            }
            used.push(pt);
        }
        let mut next_dynamic = DYNAMIC_PAYLOAD_TYPE_START;
        let mut allocate = |used: &mut Vec<u8>| -> Result<u8> {
            while used.contains(&next_dynamic) {
                next_dynamic = next_dynamic
                    .checked_add(1)
                    .filter(|pt| *pt < 128)
                    .ok_or_else(|| EngineError::invalid_rtp("dynamic payload types exhausted"))?;
            }
            used.push(next_dynamic);
            Ok(next_dynamic)
        };

        let mut codecs = Vec::with_capacity(media_codecs.len() * 2);
        for codec in media_codecs {
            if codec.is_rtx() {
                return Err(EngineError::invalid_rtp(
                    "RTX codecs are derived automatically and must not be configured",
                ));
            }
            match MediaKind::from_mime_type(&codec.mime_type) {
                Some(kind) if kind == codec.kind => {}
                _ => {
                    return Err(EngineError::invalid_rtp(format!(
                        "codec {} does not match kind {}",
                        codec.mime_type, codec.kind
                    )));
                }
            }

            let payload_type = match codec.preferred_payload_type {
                Some(pt) => pt,
                None => allocate(&mut used)?,
            };

            let mut capability = codec.clone();
            capability.preferred_payload_type = Some(payload_type);
            if capability.rtcp_feedback.is_empty() {
                capability.rtcp_feedback = default_rtcp_feedback(codec.kind);
            }
            codecs.push(capability);

            if codec.kind == MediaKind::Video {
                let rtx_payload_type = allocate(&mut used)?;
                let mut parameters = BTreeMap::new();
                parameters.insert("apt".to_string(), serde_json::Value::from(payload_type));
                codecs.push(RtpCodecCapability {
                    kind: MediaKind::Video,
                    mime_type: "video/rtx".to_string(),
                    preferred_payload_type: Some(rtx_payload_type),
                    clock_rate: codec.clock_rate,
                    channels: None,
                    parameters,
                    rtcp_feedback: Vec::new(),
                });
            }
        }

        Ok(Self {
            codecs,
            header_extensions: default_header_extensions(),
        })
    }

    /// 查找能承载给定编码的能力项
    pub fn find_codec(
        &self,
        kind: MediaKind,
        codec: &RtpCodecParameters,
    ) -> Option<&RtpCodecCapability> {
        self.codecs
            .iter()
            .find(|capability| capability.kind == kind && !capability.is_rtx() && capability.matches(codec))
    }

    /// 校验 producer 参数：每个媒体编码都必须被本能力集支持
    pub fn validate_producer(&self, kind: MediaKind, parameters: &RtpParameters) -> Result<()> {
        let mut media_codecs = parameters.media_codecs().peekable();
        if media_codecs.peek().is_none() {
            return Err(EngineError::invalid_rtp("no media codecs in RTP parameters"));
        }

        for codec in media_codecs {
            if MediaKind::from_mime_type(&codec.mime_type) != Some(kind) {
                return Err(EngineError::invalid_rtp(format!(
                    "codec {} does not match producer kind {kind}",
                    codec.mime_type
                )));
            }
            if self.find_codec(kind, codec).is_none() {
                return Err(EngineError::UnsupportedCodec {
                    mime_type: codec.mime_type.clone(),
                    clock_rate: codec.clock_rate,
                });
            }
        }
        Ok(())
    }

    /// 接收端能力集是否至少支持 producer 的一个媒体编码
    pub fn can_receive(&self, kind: MediaKind, producer: &RtpParameters) -> bool {
        producer
            .media_codecs()
            .any(|codec| self.find_codec(kind, codec).is_some())
    }

    /// 按接收端能力集裁剪 producer 参数，得到 consumer 的 RTP 参数
    ///
    /// 没有任何共同编码时返回 `None`。
    pub fn consumer_parameters(
        &self,
        kind: MediaKind,
        producer: &RtpParameters,
    ) -> Option<RtpParameters> {
        let codecs: Vec<RtpCodecParameters> = producer
            .media_codecs()
            .filter_map(|codec| {
                let capability = self.find_codec(kind, codec)?;
                Some(RtpCodecParameters {
                    mime_type: codec.mime_type.clone(),
                    payload_type: capability
                        .preferred_payload_type
                        .unwrap_or(codec.payload_type),
                    clock_rate: codec.clock_rate,
                    channels: codec.channels,
                    parameters: codec.parameters.clone(),
                    rtcp_feedback: capability.rtcp_feedback.clone(),
                })
            })
            .collect();

        if codecs.is_empty() {
            return None;
        }

        let header_extensions = producer
            .header_extensions
            .iter()
            .filter_map(|ext| {
                self.header_extensions
                    .iter()
                    .find(|cap| cap.uri == ext.uri && cap.kind.is_none_or(|k| k == kind))
                    .map(|cap| RtpHeaderExtensionParameters {
                        uri: ext.uri.clone(),
                        id: cap.preferred_id,
                        encrypt: ext.encrypt,
                    })
            })
            .collect();

        Some(RtpParameters {
            mid: None,
            codecs,
            header_extensions,
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(rand::random::<u32>()),
                ..Default::default()
            }],
            rtcp: Some(RtcpParameters {
                cname: producer.rtcp.as_ref().and_then(|rtcp| rtcp.cname.clone()),
                reduced_size: true,
            }),
        })
    }
}

fn is_rtx_mime(mime_type: &str) -> bool {
    mime_type
        .rsplit_once('/')
        .is_some_and(|(_, subtype)| subtype.eq_ignore_ascii_case("rtx"))
}

type CodecKey<'a> = (
    &'a str,
    u32,
    Option<u8>,
    &'a BTreeMap<String, serde_json::Value>,
);

fn codecs_match(a: CodecKey<'_>, b: CodecKey<'_>) -> bool {
    let (a_mime, a_clock, a_channels, a_params) = a;
    let (b_mime, b_clock, b_channels, b_params) = b;

    if !a_mime.eq_ignore_ascii_case(b_mime) || a_clock != b_clock {
        return false;
    }
    // 缺省声道数按 1 处理（视频编码两端都为 None）
    if a_channels.unwrap_or(1) != b_channels.unwrap_or(1) {
        return false;
    }
    // H264 要求 packetization-mode 一致
    if a_mime.eq_ignore_ascii_case("video/h264") {
        let mode = |params: &BTreeMap<String, serde_json::Value>| {
            params
                .get("packetization-mode")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0)
        };
        if mode(a_params) != mode(b_params) {
            return false;
        }
    }
    true
}

fn default_rtcp_feedback(kind: MediaKind) -> Vec<RtcpFeedback> {
    match kind {
        MediaKind::Audio => vec![RtcpFeedback::new("transport-cc", "")],
        MediaKind::Video => vec![
            RtcpFeedback::new("nack", ""),
            RtcpFeedback::new("nack", "pli"),
            RtcpFeedback::new("ccm", "fir"),
            RtcpFeedback::new("goog-remb", ""),
            RtcpFeedback::new("transport-cc", ""),
        ],
    }
}

fn default_header_extensions() -> Vec<RtpHeaderExtension> {
    let ext = |kind: Option<MediaKind>, uri: &str, preferred_id: u16| RtpHeaderExtension {
        kind,
        uri: uri.to_string(),
        preferred_id,
    };
    vec![
        ext(None, "urn:ietf:params:rtp-hdrext:sdes:mid", 1),
        ext(
            Some(MediaKind::Audio),
            "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
            10,
        ),
        ext(
            None,
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            4,
        ),
        ext(Some(MediaKind::Video), "urn:3gpp:video-orientation", 11),
    ]
}

/// 部署默认的媒体编码：Opus 48kHz 双声道 + VP8
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: None,
            clock_rate: 48000,
            channels: Some(2),
            parameters: BTreeMap::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: BTreeMap::new(),
            rtcp_feedback: Vec::new(),
        },
    ]
}
