//! JSON 信令协议
//!
//! 请求 `{"id", "method", "data"}`；响应以 `replyFor` 回显请求 ID；
//! 通知不带 `replyFor`：
//!
//! ```json
//! {"id": 7, "method": "produce", "data": {"transportId": "...", "kind": "video", "rtpParameters": {}}}
//! {"replyFor": 7, "ok": true, "data": {"id": "..."}}
//! {"replyFor": 7, "ok": false, "error": {"code": "InvalidState", "message": "..."}}
//! {"notification": "newProducer", "data": {"producerId": "...", "kind": "video"}}
//! ```

use crate::error::SignalingError;
use crate::ids::ResourceId;
use media_engine::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpParameters,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========== 请求 ==========

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub sender: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: ResourceId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: ResourceId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub transport_id: ResourceId,
    pub producer_id: ResourceId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub producer_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransportRequest {
    pub transport_id: ResourceId,
}

/// 客户端请求
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetRouterRtpCapabilities,
    CreateWebRtcTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
    CloseProducer(CloseProducerRequest),
    CloseTransport(CloseTransportRequest),
}

impl Request {
    /// 规范方法名（用于日志）
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            Self::CreateWebRtcTransport(_) => "createWebRtcTransport",
            Self::ConnectTransport(_) => "connectTransport",
            Self::Produce(_) => "produce",
            Self::Consume(_) => "consume",
            Self::CloseProducer(_) => "closeProducer",
            Self::CloseTransport(_) => "closeTransport",
        }
    }
}

/// 带关联 ID 的请求
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: Option<u64>,
    pub request: Request,
}

/// 解析失败；`id` 为能从原文中恢复出的请求 ID
#[derive(Debug)]
pub struct ParseFailure {
    pub id: Option<u64>,
    pub error: SignalingError,
}

impl ParseFailure {
    pub fn into_response(self) -> ServerMessage {
        ServerMessage::failure(self.id, &self.error)
    }
}

/// 尽力从原始文本中取出请求 ID
pub fn peek_request_id(text: &str) -> Option<u64> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("id").and_then(Value::as_u64))
}

pub fn parse_request(text: &str) -> Result<RequestEnvelope, ParseFailure> {
    let value: Value = serde_json::from_str(text).map_err(|e| ParseFailure {
        id: None,
        error: SignalingError::bad_request(format!("invalid JSON: {e}")),
    })?;
    let id = value.get("id").and_then(Value::as_u64);

    let raw: RawRequest = serde_json::from_value(value).map_err(|e| ParseFailure {
        id,
        error: SignalingError::bad_request(format!("malformed request: {e}")),
    })?;

    let request = match raw.method.as_str() {
        "getRouterRtpCapabilities" | "getCapabilities" => Request::GetRouterRtpCapabilities,
        "createWebRtcTransport" | "createTransport" => {
            Request::CreateWebRtcTransport(decode_data(raw.id, &raw.method, raw.data)?)
        }
        "connectTransport" => Request::ConnectTransport(decode_data(raw.id, &raw.method, raw.data)?),
        "produce" => Request::Produce(decode_data(raw.id, &raw.method, raw.data)?),
        "consume" => Request::Consume(decode_data(raw.id, &raw.method, raw.data)?),
        "closeProducer" => Request::CloseProducer(decode_data(raw.id, &raw.method, raw.data)?),
        "closeTransport" => Request::CloseTransport(decode_data(raw.id, &raw.method, raw.data)?),
        other => {
            return Err(ParseFailure {
                id: raw.id,
                error: SignalingError::bad_request(format!("unknown method '{other}'")),
            });
        }
    };

    Ok(RequestEnvelope {
        id: raw.id,
        request,
    })
}

fn decode_data<T: DeserializeOwned>(
    id: Option<u64>,
    method: &str,
    data: Value,
) -> Result<T, ParseFailure> {
    serde_json::from_value(data).map_err(|e| ParseFailure {
        id,
        error: SignalingError::bad_request(format!("invalid data for '{method}': {e}")),
    })
}

// ========== 响应 ==========

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCreated {
    pub id: ResourceId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerCreated {
    pub id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerCreated {
    pub id: ResourceId,
    pub producer_id: ResourceId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// 成功响应的数据部分
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    RtpCapabilities(RtpCapabilities),
    TransportCreated(TransportCreated),
    ProducerCreated(ProducerCreated),
    ConsumerCreated(ConsumerCreated),
    /// 空对象 `{}`
    Ack {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_for: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

// ========== 通知 ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProducer {
    pub producer_id: ResourceId,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerClosed {
    pub consumer_id: ResourceId,
    pub producer_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportClosed {
    pub transport_id: ResourceId,
}

/// 服务端主动推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", content = "data", rename_all = "camelCase")]
pub enum Notification {
    NewProducer(NewProducer),
    ConsumerClosed(ConsumerClosed),
    TransportClosed(TransportClosed),
}

/// 发往客户端的一帧
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

impl ServerMessage {
    pub fn success(reply_for: Option<u64>, data: ResponseData) -> Self {
        Self::Response(Response {
            reply_for,
            ok: true,
            data: Some(data),
            error: None,
        })
    }

    pub fn failure(reply_for: Option<u64>, error: &SignalingError) -> Self {
        Self::Response(Response {
            reply_for,
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Notification> for ServerMessage {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_produce() {
        let text = json!({
            "id": 7,
            "method": "produce",
            "data": {
                "transportId": "t-1",
                "kind": "video",
                "rtpParameters": {
                    "codecs": [{"mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000}],
                    "encodings": [{"ssrc": 1111}]
                }
            }
        })
        .to_string();

        let envelope = parse_request(&text).unwrap();
        assert_eq!(envelope.id, Some(7));
        let Request::Produce(produce) = envelope.request else {
            panic!("expected produce");
        };
        assert_eq!(produce.transport_id.as_str(), "t-1");
        assert_eq!(produce.kind, MediaKind::Video);
        assert_eq!(produce.rtp_parameters.codecs[0].payload_type, 101);
    }

    #[test]
    fn test_method_aliases() {
        let envelope = parse_request(r#"{"id": 1, "method": "getCapabilities"}"#).unwrap();
        assert_eq!(envelope.request, Request::GetRouterRtpCapabilities);

        let envelope =
            parse_request(r#"{"id": 2, "method": "createTransport", "data": {"sender": true}}"#)
                .unwrap();
        assert_eq!(
            envelope.request,
            Request::CreateWebRtcTransport(CreateTransportRequest { sender: true })
        );
        assert_eq!(envelope.request.method(), "createWebRtcTransport");
    }

    #[test]
    fn test_parse_failures_keep_request_id() {
        let failure = parse_request(r#"{"id": 3, "method": "dance"}"#).unwrap_err();
        assert_eq!(failure.id, Some(3));
        assert_eq!(failure.error.code(), "BadRequest");

        let failure =
            parse_request(r#"{"id": 4, "method": "createWebRtcTransport"}"#).unwrap_err();
        assert_eq!(failure.id, Some(4));

        let failure = parse_request("{not json").unwrap_err();
        assert_eq!(failure.id, None);
        assert_eq!(peek_request_id(r#"{"id": 9}"#), Some(9));
    }

    #[test]
    fn test_response_wire_format() {
        let ack = ServerMessage::success(Some(5), ResponseData::Ack {});
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({"replyFor": 5, "ok": true, "data": {}})
        );

        let failure = ServerMessage::failure(
            None,
            &SignalingError::invalid_state("transport is not connected"),
        );
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "ok": false,
                "error": {"code": "InvalidState", "message": "invalid state: transport is not connected"}
            })
        );
    }

    #[test]
    fn test_notification_wire_format() {
        let message: ServerMessage = Notification::ConsumerClosed(ConsumerClosed {
            consumer_id: ResourceId::from("c-1"),
            producer_id: ResourceId::from("p-1"),
        })
        .into();
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "notification": "consumerClosed",
                "data": {"consumerId": "c-1", "producerId": "p-1"}
            })
        );
    }
}
