//! 进程内媒体引擎
//!
//! 负责句柄分配、ICE/DTLS 参数生成、RTP 参数校验与 consumer 参数推导，
//! 不转发任何媒体包。真实的转发引擎通过同一个 [`MediaEngine`] trait 接入。

use crate::engine::{
    EngineConsumer, EngineEvent, EngineHandle, EngineProducer, EngineTransport, MediaEngine,
};
use crate::error::{EngineError, Result};
use crate::rtp::{MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters};
use crate::transport::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, IceProtocol,
    TransportListenOptions, TransportParameters,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct LocalTransport {
    port: u16,
    connected: bool,
}

#[derive(Debug)]
struct LocalProducer {
    transport: EngineHandle,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Debug)]
struct LocalConsumer {
    transport: EngineHandle,
    producer: EngineHandle,
}

#[derive(Debug, Default)]
struct LocalState {
    transports: HashMap<EngineHandle, LocalTransport>,
    producers: HashMap<EngineHandle, LocalProducer>,
    consumers: HashMap<EngineHandle, LocalConsumer>,
    ports_in_use: HashSet<u16>,
    next_port: u16,
    dtls_handshakes: u64,
}

/// 引擎内部计数（用于健康检查和测试）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalEngineStats {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
    /// 已执行的 DTLS 握手次数
    pub dtls_handshakes: u64,
}

/// 进程内引擎
#[derive(Debug)]
pub struct LocalEngine {
    capabilities: RtpCapabilities,
    fingerprint: DtlsFingerprint,
    state: Mutex<LocalState>,
    events: broadcast::Sender<EngineEvent>,
}

impl LocalEngine {
    /// 以部署配置的媒体编码创建引擎
    pub fn new(media_codecs: &[RtpCodecCapability]) -> Result<Self> {
        let capabilities = RtpCapabilities::from_media_codecs(media_codecs)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            "Local media engine created with {} codecs",
            capabilities.codecs.len()
        );

        Ok(Self {
            capabilities,
            fingerprint: generate_fingerprint(),
            state: Mutex::new(LocalState::default()),
            events,
        })
    }

    /// 模拟引擎检测到 transport 网络失败
    ///
    /// 引擎内部资源保持不变，由控制面收到事件后走关闭流程。
    pub fn report_transport_failure(&self, transport: &EngineHandle) {
        if !self.state.lock().transports.contains_key(transport) {
            warn!("Ignoring failure report for unknown transport {}", transport);
            return;
        }
        warn!("Transport {} failed", transport);
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(EngineEvent::TransportFailed {
            handle: transport.clone(),
        });
    }

    pub fn stats(&self) -> LocalEngineStats {
        let state = self.state.lock();
        LocalEngineStats {
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
            dtls_handshakes: state.dtls_handshakes,
        }
    }

    fn allocate_port(state: &mut LocalState, range: (u16, u16)) -> Result<u16> {
        let (min, max) = range;
        let span = u32::from(max - min) + 1;
        if state.next_port < min || state.next_port > max {
            state.next_port = min;
        }
        for _ in 0..span {
            let candidate = state.next_port;
            state.next_port = if candidate == max { min } else { candidate + 1 };
            if state.ports_in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(EngineError::PortsExhausted { min, max })
    }

    fn remove_consumer_locked(state: &mut LocalState, handle: &EngineHandle) {
        if state.consumers.remove(handle).is_some() {
            debug!("Engine consumer {} closed", handle);
        }
    }

    fn remove_producer_locked(state: &mut LocalState, handle: &EngineHandle) {
        if state.producers.remove(handle).is_none() {
            return;
        }
        let dependents: Vec<EngineHandle> = state
            .consumers
            .iter()
            .filter(|(_, consumer)| &consumer.producer == handle)
            .map(|(id, _)| id.clone())
            .collect();
        for consumer in &dependents {
            Self::remove_consumer_locked(state, consumer);
        }
        debug!(
            "Engine producer {} closed ({} dependent consumers)",
            handle,
            dependents.len()
        );
    }
}

#[async_trait]
impl MediaEngine for LocalEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn create_transport(&self, options: &TransportListenOptions) -> Result<EngineTransport> {
        options.validate()?;

        let handle = EngineHandle::generate();
        let port = {
            let mut state = self.state.lock();
            let port = Self::allocate_port(&mut state, options.port_range)?;
            state.transports.insert(
                handle.clone(),
                LocalTransport {
                    port,
                    connected: false,
                },
            );
            port
        };

        let ip = options.candidate_ip().to_string();
        let mut ice_candidates = Vec::with_capacity(2);
        // UDP 优先时 UDP 候选优先级更高
        let (udp_priority, tcp_priority) = if options.prefer_udp {
            (1_076_302_079, 1_076_276_479)
        } else {
            (1_076_276_479, 1_076_302_079)
        };
        if options.enable_udp {
            ice_candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: udp_priority,
                ip: ip.clone(),
                protocol: IceProtocol::Udp,
                port,
                candidate_type: "host".to_string(),
                tcp_type: None,
            });
        }
        if options.enable_tcp {
            ice_candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: tcp_priority,
                ip,
                protocol: IceProtocol::Tcp,
                port,
                candidate_type: "host".to_string(),
                tcp_type: Some("passive".to_string()),
            });
        }

        debug!("Engine transport {} allocated on port {}", handle, port);

        Ok(EngineTransport {
            handle,
            parameters: TransportParameters {
                ice_parameters: IceParameters {
                    username_fragment: random_token(16),
                    password: random_token(32),
                    ice_lite: true,
                },
                ice_candidates,
                dtls_parameters: DtlsParameters {
                    role: Some(DtlsRole::Auto),
                    fingerprints: vec![self.fingerprint.clone()],
                },
            },
        })
    }

    async fn connect_transport(
        &self,
        transport: &EngineHandle,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()> {
        dtls_parameters.validate()?;

        let mut state = self.state.lock();
        let entry = state
            .transports
            .get_mut(transport)
            .ok_or_else(|| EngineError::TransportNotFound {
                handle: transport.to_string(),
            })?;
        if entry.connected {
            return Err(EngineError::AlreadyConnected {
                handle: transport.to_string(),
            });
        }
        entry.connected = true;
        state.dtls_handshakes += 1;

        debug!("Engine transport {} connected", transport);
        Ok(())
    }

    async fn produce(
        &self,
        transport: &EngineHandle,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer> {
        self.capabilities.validate_producer(kind, rtp_parameters)?;

        let mut state = self.state.lock();
        if !state.transports.contains_key(transport) {
            return Err(EngineError::TransportNotFound {
                handle: transport.to_string(),
            });
        }

        let handle = EngineHandle::generate();
        state.producers.insert(
            handle.clone(),
            LocalProducer {
                transport: transport.clone(),
                kind,
                rtp_parameters: rtp_parameters.clone(),
            },
        );
        debug!("Engine producer {} ({}) created on {}", handle, kind, transport);

        Ok(EngineProducer { handle })
    }

    fn can_consume(&self, producer: &EngineHandle, rtp_capabilities: &RtpCapabilities) -> bool {
        let state = self.state.lock();
        state
            .producers
            .get(producer)
            .is_some_and(|p| rtp_capabilities.can_receive(p.kind, &p.rtp_parameters))
    }

    async fn consume(
        &self,
        transport: &EngineHandle,
        producer: &EngineHandle,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<EngineConsumer> {
        let mut state = self.state.lock();
        if !state.transports.contains_key(transport) {
            return Err(EngineError::TransportNotFound {
                handle: transport.to_string(),
            });
        }
        let source = state
            .producers
            .get(producer)
            .ok_or_else(|| EngineError::ProducerNotFound {
                handle: producer.to_string(),
            })?;

        let kind = source.kind;
        let rtp_parameters = rtp_capabilities
            .consumer_parameters(kind, &source.rtp_parameters)
            .ok_or_else(|| EngineError::IncompatibleCapabilities {
                handle: producer.to_string(),
            })?;

        let handle = EngineHandle::generate();
        state.consumers.insert(
            handle.clone(),
            LocalConsumer {
                transport: transport.clone(),
                producer: producer.clone(),
            },
        );
        debug!(
            "Engine consumer {} created on {} for producer {}",
            handle, transport, producer
        );

        Ok(EngineConsumer {
            handle,
            kind,
            rtp_parameters,
            paused,
        })
    }

    fn close_consumer(&self, consumer: &EngineHandle) {
        let mut state = self.state.lock();
        Self::remove_consumer_locked(&mut state, consumer);
    }

    fn close_producer(&self, producer: &EngineHandle) {
        let mut state = self.state.lock();
        Self::remove_producer_locked(&mut state, producer);
    }

    fn close_transport(&self, transport: &EngineHandle) {
        let mut state = self.state.lock();
        let Some(entry) = state.transports.remove(transport) else {
            return;
        };
        state.ports_in_use.remove(&entry.port);

        let consumers: Vec<EngineHandle> = state
            .consumers
            .iter()
            .filter(|(_, c)| &c.transport == transport)
            .map(|(id, _)| id.clone())
            .collect();
        for consumer in &consumers {
            Self::remove_consumer_locked(&mut state, consumer);
        }

        let producers: Vec<EngineHandle> = state
            .producers
            .iter()
            .filter(|(_, p)| &p.transport == transport)
            .map(|(id, _)| id.clone())
            .collect();
        for producer in &producers {
            Self::remove_producer_locked(&mut state, producer);
        }

        debug!("Engine transport {} closed", transport);
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// 以随机种子的 SHA-256 摘要作为本实例的证书指纹
fn generate_fingerprint() -> DtlsFingerprint {
    let seed: [u8; 32] = rand::random();
    let digest = Sha256::digest(seed);
    let value = digest
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(":");
    DtlsFingerprint {
        algorithm: "sha-256".to_string(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{RtpCodecParameters, default_media_codecs};
    use std::collections::BTreeMap;

    fn engine() -> LocalEngine {
        LocalEngine::new(&default_media_codecs()).unwrap()
    }

    fn client_dtls() -> DtlsParameters {
        DtlsParameters {
            role: Some(DtlsRole::Client),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AB:CD".to_string(),
            }],
        }
    }

    fn opus_parameters() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 111,
                clock_rate: 48000,
                channels: Some(2),
                parameters: BTreeMap::new(),
                rtcp_feedback: Vec::new(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_transport_generates_parameters() {
        let engine = engine();
        let transport = engine
            .create_transport(&TransportListenOptions::default())
            .await
            .unwrap();

        let params = &transport.parameters;
        assert_eq!(params.ice_parameters.username_fragment.len(), 16);
        assert_eq!(params.ice_parameters.password.len(), 32);
        assert_eq!(params.ice_candidates.len(), 2);
        assert_eq!(params.ice_candidates[0].protocol, IceProtocol::Udp);
        assert!(params.ice_candidates[0].priority > params.ice_candidates[1].priority);
        assert_eq!(params.ice_candidates[0].ip, "127.0.0.1");

        let fp = &params.dtls_parameters.fingerprints[0];
        assert_eq!(fp.algorithm, "sha-256");
        // 32 字节 -> 32 组十六进制 + 31 个冒号
        assert_eq!(fp.value.len(), 32 * 2 + 31);
    }

    #[tokio::test]
    async fn test_ports_are_not_reused_while_live() {
        let engine = engine();
        let options = TransportListenOptions {
            port_range: (40000, 40001),
            ..Default::default()
        };
        let a = engine.create_transport(&options).await.unwrap();
        let b = engine.create_transport(&options).await.unwrap();
        assert_ne!(
            a.parameters.ice_candidates[0].port,
            b.parameters.ice_candidates[0].port
        );
        assert!(matches!(
            engine.create_transport(&options).await,
            Err(EngineError::PortsExhausted { .. })
        ));

        engine.close_transport(&a.handle);
        assert!(engine.create_transport(&options).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_is_one_shot() {
        let engine = engine();
        let transport = engine
            .create_transport(&TransportListenOptions::default())
            .await
            .unwrap();

        engine
            .connect_transport(&transport.handle, &client_dtls())
            .await
            .unwrap();
        assert!(matches!(
            engine.connect_transport(&transport.handle, &client_dtls()).await,
            Err(EngineError::AlreadyConnected { .. })
        ));
        assert_eq!(engine.stats().dtls_handshakes, 1);
    }

    #[tokio::test]
    async fn test_produce_consume_and_close_cascade() {
        let engine = engine();
        let options = TransportListenOptions::default();
        let send = engine.create_transport(&options).await.unwrap();
        let recv = engine.create_transport(&options).await.unwrap();

        let producer = engine
            .produce(&send.handle, MediaKind::Audio, &opus_parameters())
            .await
            .unwrap();

        let caps = engine.rtp_capabilities();
        assert!(engine.can_consume(&producer.handle, &caps));
        assert!(!engine.can_consume(&EngineHandle::generate(), &caps));
        assert!(!engine.can_consume(&producer.handle, &RtpCapabilities::default()));

        let consumer = engine
            .consume(&recv.handle, &producer.handle, &caps, false)
            .await
            .unwrap();
        assert_eq!(consumer.kind, MediaKind::Audio);
        assert!(!consumer.paused);
        assert_eq!(consumer.rtp_parameters.codecs[0].payload_type, 100);

        engine.close_transport(&send.handle);
        let stats = engine.stats();
        assert_eq!(stats.transports, 1);
        assert_eq!(stats.producers, 0);
        assert_eq!(stats.consumers, 0);

        // 重复关闭是 no-op
        engine.close_transport(&send.handle);
        engine.close_consumer(&consumer.handle);
    }

    #[tokio::test]
    async fn test_produce_rejects_unsupported_codec() {
        let engine = engine();
        let transport = engine
            .create_transport(&TransportListenOptions::default())
            .await
            .unwrap();
        let mut params = opus_parameters();
        params.codecs[0].mime_type = "audio/PCMU".to_string();
        params.codecs[0].clock_rate = 8000;
        params.codecs[0].channels = None;

        assert!(matches!(
            engine.produce(&transport.handle, MediaKind::Audio, &params).await,
            Err(EngineError::UnsupportedCodec { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_report_emits_event() {
        let engine = engine();
        let mut events = engine.subscribe();
        let transport = engine
            .create_transport(&TransportListenOptions::default())
            .await
            .unwrap();

        engine.report_transport_failure(&transport.handle);
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::TransportFailed {
                handle: transport.handle.clone()
            }
        );
    }
}
