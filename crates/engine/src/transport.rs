//! WebRTC transport 的网络/安全参数
//!
//! 由引擎生成，信令层原样透传给客户端。

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use strum::Display;

/// transport 监听选项（来自部署配置）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportListenOptions {
    /// 实际绑定的地址
    pub listen_ip: IpAddr,
    /// 对外宣告的地址（NAT 环境下的公网地址）
    pub announced_ip: Option<IpAddr>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    /// RTC 端口范围（闭区间）
    pub port_range: (u16, u16),
}

impl TransportListenOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_udp && !self.enable_tcp {
            return Err(EngineError::InvalidOptions {
                reason: "at least one of UDP or TCP must be enabled".to_string(),
            });
        }
        if self.port_range.0 == 0 || self.port_range.0 > self.port_range.1 {
            return Err(EngineError::InvalidOptions {
                reason: format!(
                    "invalid RTC port range {}-{}",
                    self.port_range.0, self.port_range.1
                ),
            });
        }
        Ok(())
    }

    /// 候选地址中使用的 IP
    pub fn candidate_ip(&self) -> IpAddr {
        self.announced_ip.unwrap_or(self.listen_ip)
    }
}

impl Default for TransportListenOptions {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            announced_ip: Some(IpAddr::from([127, 0, 0, 1])),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            port_range: (40000, 49999),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IceProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: IceProtocol,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<DtlsRole>,
    pub fingerprints: Vec<DtlsFingerprint>,
}

impl DtlsParameters {
    /// 客户端 connect 时提交的参数至少要有一个完整的指纹
    pub fn validate(&self) -> Result<()> {
        if self.fingerprints.is_empty() {
            return Err(EngineError::invalid_dtls("no fingerprints"));
        }
        if let Some(fp) = self
            .fingerprints
            .iter()
            .find(|fp| fp.algorithm.trim().is_empty() || fp.value.trim().is_empty())
        {
            return Err(EngineError::invalid_dtls(format!(
                "incomplete fingerprint (algorithm '{}')",
                fp.algorithm
            )));
        }
        if self.role == Some(DtlsRole::Auto) {
            return Err(EngineError::invalid_dtls("remote role must not be 'auto'"));
        }
        Ok(())
    }
}

/// 创建 transport 后返回给客户端的全部参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(algorithm: &str, value: &str) -> DtlsFingerprint {
        DtlsFingerprint {
            algorithm: algorithm.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_dtls_validation() {
        let ok = DtlsParameters {
            role: Some(DtlsRole::Client),
            fingerprints: vec![fingerprint("sha-256", "AA:BB")],
        };
        assert!(ok.validate().is_ok());

        let no_role = DtlsParameters {
            role: None,
            fingerprints: vec![fingerprint("sha-256", "AA:BB")],
        };
        assert!(no_role.validate().is_ok());

        let empty = DtlsParameters {
            role: Some(DtlsRole::Client),
            fingerprints: vec![],
        };
        assert!(empty.validate().is_err());

        let blank = DtlsParameters {
            role: Some(DtlsRole::Server),
            fingerprints: vec![fingerprint("sha-256", " ")],
        };
        assert!(blank.validate().is_err());

        let auto = DtlsParameters {
            role: Some(DtlsRole::Auto),
            fingerprints: vec![fingerprint("sha-256", "AA:BB")],
        };
        assert!(auto.validate().is_err());
    }

    #[test]
    fn test_listen_options_validation() {
        let mut options = TransportListenOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.candidate_ip(), IpAddr::from([127, 0, 0, 1]));

        options.enable_udp = false;
        options.enable_tcp = false;
        assert!(options.validate().is_err());

        let reversed = TransportListenOptions {
            port_range: (5000, 4000),
            ..Default::default()
        };
        assert!(reversed.validate().is_err());
    }

    #[test]
    fn test_candidate_serializes_type_field() {
        let candidate = IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1076302079,
            ip: "127.0.0.1".to_string(),
            protocol: IceProtocol::Udp,
            port: 40000,
            candidate_type: "host".to_string(),
            tcp_type: None,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["type"], "host");
        assert_eq!(json["protocol"], "udp");
        assert!(json.get("tcpType").is_none());
    }
}
