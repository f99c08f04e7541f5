//! 信令请求分发
//!
//! 把客户端请求路由到各处理函数，对照注册表检查前置条件，调用媒体引擎，
//! 并负责资源的级联释放（显式关闭、会话断开、引擎上报失败）。
//!
//! # 锁顺序
//!
//! 每个 transport 有自己的操作锁，connect / produce / consume / close 在整个
//! 操作期间持有（包括等待引擎）。注册表写锁只在单次读写内持有，从不跨越
//! `await`，也从不在持有注册表锁时去拿 transport 锁。

use crate::broadcaster::EventBroadcaster;
use crate::error::{ResourceKind, Result, SignalingError};
use crate::ids::{ResourceId, SessionId};
use crate::protocol::{
    ConsumerClosed, ConsumerCreated, Notification, ProducerCreated, Request, ResponseData,
    ServerMessage, TransportClosed, TransportCreated,
};
use crate::registry::{
    Consumer, Entry, Producer, Removed, ResourceRegistry, Transport, TransportRole,
    TransportState,
};
use crate::routing::RoutingContext;
use crate::session::{OwnedResource, SessionManager};
use media_engine::{
    DtlsParameters, EngineEvent, MediaEngine, MediaKind, RtpCapabilities, RtpParameters,
};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Dispatcher {
    routing: Arc<RoutingContext>,
    engine: Arc<dyn MediaEngine>,
    registry: Arc<ResourceRegistry>,
    sessions: Arc<SessionManager>,
    broadcaster: EventBroadcaster,
}

impl Dispatcher {
    pub fn new(routing: Arc<RoutingContext>, engine: Arc<dyn MediaEngine>) -> Self {
        let sessions = Arc::new(SessionManager::new());
        Self {
            routing,
            engine,
            registry: Arc::new(ResourceRegistry::new()),
            broadcaster: EventBroadcaster::new(sessions.clone()),
            sessions,
        }
    }

    pub fn routing(&self) -> &Arc<RoutingContext> {
        &self.routing
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// 为新连接创建会话
    pub async fn open_session(
        &self,
        remote_ip: Option<IpAddr>,
        outbound: UnboundedSender<ServerMessage>,
    ) -> SessionId {
        self.sessions.register(remote_ip, outbound).await
    }

    /// 执行单个请求
    pub async fn dispatch(&self, session: &SessionId, request: Request) -> Result<ResponseData> {
        match request {
            Request::GetRouterRtpCapabilities => Ok(ResponseData::RtpCapabilities(
                self.router_rtp_capabilities(),
            )),
            Request::CreateWebRtcTransport(req) => self
                .create_transport(session, TransportRole::from_sender_flag(req.sender))
                .await
                .map(ResponseData::TransportCreated),
            Request::ConnectTransport(req) => {
                self.connect_transport(session, &req.transport_id, &req.dtls_parameters)
                    .await?;
                Ok(ResponseData::Ack {})
            }
            Request::Produce(req) => {
                let id = self
                    .produce(session, &req.transport_id, req.kind, req.rtp_parameters)
                    .await?;
                Ok(ResponseData::ProducerCreated(ProducerCreated { id }))
            }
            Request::Consume(req) => self
                .consume(
                    session,
                    &req.transport_id,
                    &req.producer_id,
                    &req.rtp_capabilities,
                )
                .await
                .map(ResponseData::ConsumerCreated),
            Request::CloseProducer(req) => {
                self.close_producer(session, &req.producer_id).await?;
                Ok(ResponseData::Ack {})
            }
            Request::CloseTransport(req) => {
                self.close_transport(session, &req.transport_id).await?;
                Ok(ResponseData::Ack {})
            }
        }
    }

    pub fn router_rtp_capabilities(&self) -> RtpCapabilities {
        self.routing.rtp_capabilities().clone()
    }

    // ========== Transport ==========

    pub async fn create_transport(
        &self,
        session: &SessionId,
        role: TransportRole,
    ) -> Result<TransportCreated> {
        let created = self
            .engine
            .create_transport(self.routing.listen_options())
            .await?;
        let handle = created.handle.clone();
        let parameters = created.parameters.clone();

        let id = self
            .registry
            .create_transport(session.clone(), Transport::new(role, handle.clone(), parameters))
            .await;

        if let Err(e) = self
            .sessions
            .track(session, OwnedResource::Transport(id.clone()))
            .await
        {
            let _ = self.registry.close_transport(&id).await;
            self.engine.close_transport(&handle);
            return Err(e);
        }

        info!(
            session_id = %session,
            transport_id = %id,
            "🚚 Transport created ({})",
            role
        );

        Ok(TransportCreated {
            id,
            ice_parameters: created.parameters.ice_parameters,
            ice_candidates: created.parameters.ice_candidates,
            dtls_parameters: created.parameters.dtls_parameters,
        })
    }

    /// 已连接时直接成功，不再调用引擎；引擎失败时回到 Created
    pub async fn connect_transport(
        &self,
        session: &SessionId,
        transport_id: &ResourceId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()> {
        let entry = self.owned_transport(session, transport_id).await?;
        let lock = entry.value.op_lock();
        let _guard = lock.lock().await;

        let entry = self.registry.transport(transport_id).await?;
        match entry.value.state {
            TransportState::Connected => {
                debug!(transport_id = %transport_id, "Transport already connected");
                return Ok(());
            }
            TransportState::Created => {}
            state => {
                return Err(SignalingError::invalid_state(format!(
                    "transport {transport_id} is {state}"
                )));
            }
        }

        self.registry
            .set_transport_state(transport_id, TransportState::Connecting)
            .await?;

        match self
            .engine
            .connect_transport(&entry.value.handle, dtls_parameters)
            .await
        {
            Ok(()) => {
                self.registry
                    .set_transport_state(transport_id, TransportState::Connected)
                    .await?;
                info!(session_id = %session, transport_id = %transport_id, "🔐 Transport connected");
                Ok(())
            }
            Err(e) => {
                warn!(transport_id = %transport_id, "Transport connect failed: {}", e);
                // transport 可能在等待期间被关闭，此时无需回退
                let _ = self
                    .registry
                    .set_transport_state(transport_id, TransportState::Created)
                    .await;
                Err(e.into())
            }
        }
    }

    /// 客户端显式关闭自己的 transport
    pub async fn close_transport(&self, session: &SessionId, transport_id: &ResourceId) -> Result<()> {
        self.owned_transport(session, transport_id).await?;
        self.close_transport_internal(transport_id, Some(session))
            .await?;
        Ok(())
    }

    async fn close_transport_internal(
        &self,
        transport_id: &ResourceId,
        initiator: Option<&SessionId>,
    ) -> Result<Removed> {
        let entry = self.registry.transport(transport_id).await?;
        let lock = entry.value.op_lock();
        let _guard = lock.lock().await;

        let removed = self.registry.close_transport(transport_id).await?;
        info!(
            transport_id = %transport_id,
            "🧹 Transport closed ({} producers, {} consumers released)",
            removed.producers.len(),
            removed.consumers.len()
        );
        self.release(&removed, initiator).await;
        Ok(removed)
    }

    // ========== Producer ==========

    pub async fn produce(
        &self,
        session: &SessionId,
        transport_id: &ResourceId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ResourceId> {
        let entry = self.owned_transport(session, transport_id).await?;
        let lock = entry.value.op_lock();
        let _guard = lock.lock().await;

        let entry = self.registry.transport(transport_id).await?;
        require_ready(&entry, TransportRole::Sender)?;

        let produced = self
            .engine
            .produce(&entry.value.handle, kind, &rtp_parameters)
            .await?;

        let producer_id = match self
            .registry
            .insert_producer(
                session.clone(),
                Producer {
                    transport_id: transport_id.clone(),
                    kind,
                    rtp_parameters,
                    handle: produced.handle.clone(),
                },
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.engine.close_producer(&produced.handle);
                return Err(e);
            }
        };

        if let Err(e) = self
            .sessions
            .track(session, OwnedResource::Producer(producer_id.clone()))
            .await
        {
            if let Ok(removed) = self.registry.remove_producer(&producer_id).await {
                self.release(&removed, Some(session)).await;
            }
            return Err(e);
        }

        info!(
            session_id = %session,
            transport_id = %transport_id,
            producer_id = %producer_id,
            "🎙️ Producer created ({})",
            kind
        );

        self.broadcaster
            .publish_new_producer(session, &producer_id, kind)
            .await;

        Ok(producer_id)
    }

    pub async fn close_producer(&self, session: &SessionId, producer_id: &ResourceId) -> Result<()> {
        let entry = self.registry.producer(producer_id).await?;
        if &entry.owner != session {
            return Err(SignalingError::forbidden(ResourceKind::Producer, producer_id));
        }
        let removed = self.registry.remove_producer(producer_id).await?;
        info!(
            session_id = %session,
            producer_id = %producer_id,
            "Producer closed ({} consumers released)",
            removed.consumers.len()
        );
        self.release(&removed, Some(session)).await;
        Ok(())
    }

    // ========== Consumer ==========

    pub async fn consume(
        &self,
        session: &SessionId,
        transport_id: &ResourceId,
        producer_id: &ResourceId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerCreated> {
        let entry = self.owned_transport(session, transport_id).await?;
        let lock = entry.value.op_lock();
        let _guard = lock.lock().await;

        let transport = self.registry.transport(transport_id).await?;
        require_ready(&transport, TransportRole::Receiver)?;

        let producer = self.registry.producer(producer_id).await?;

        if !self
            .engine
            .can_consume(&producer.value.handle, rtp_capabilities)
        {
            // 引擎对已关闭的 producer 同样回答 false
            self.registry.producer(producer_id).await?;
            debug!(
                transport_id = %transport_id,
                producer_id = %producer_id,
                "Capability check rejected consumer"
            );
            return Err(SignalingError::NegotiationFailed {
                producer_id: producer_id.to_string(),
            });
        }

        let consumed = self
            .engine
            .consume(
                &transport.value.handle,
                &producer.value.handle,
                rtp_capabilities,
                false,
            )
            .await?;

        let consumer_id = match self
            .registry
            .insert_consumer(
                session.clone(),
                Consumer {
                    transport_id: transport_id.clone(),
                    producer_id: producer_id.clone(),
                    kind: consumed.kind,
                    rtp_parameters: consumed.rtp_parameters.clone(),
                    handle: consumed.handle.clone(),
                },
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.engine.close_consumer(&consumed.handle);
                return Err(e);
            }
        };

        if let Err(e) = self
            .sessions
            .track(session, OwnedResource::Consumer(consumer_id.clone()))
            .await
        {
            if self.registry.remove_consumer(&consumer_id).await.is_ok() {
                self.engine.close_consumer(&consumed.handle);
            }
            return Err(e);
        }

        info!(
            session_id = %session,
            transport_id = %transport_id,
            producer_id = %producer_id,
            consumer_id = %consumer_id,
            "🎧 Consumer created ({})",
            consumed.kind
        );

        Ok(ConsumerCreated {
            id: consumer_id,
            producer_id: producer_id.clone(),
            kind: consumed.kind,
            rtp_parameters: consumed.rtp_parameters,
        })
    }

    // ========== 会话与引擎事件 ==========

    /// 会话断开：依次释放 consumer、producer（含级联）、transport，最后删除会话
    pub async fn disconnect(&self, session: &SessionId) {
        let Some(mut owned) = self.sessions.begin_close(session).await else {
            return;
        };
        owned.merge(self.registry.owned_by(session).await);

        for consumer_id in &owned.consumers {
            if let Ok(entry) = self.registry.remove_consumer(consumer_id).await {
                self.engine.close_consumer(&entry.value.handle);
            }
        }

        for producer_id in &owned.producers {
            if let Ok(removed) = self.registry.remove_producer(producer_id).await {
                self.release(&removed, Some(session)).await;
            }
        }

        for transport_id in &owned.transports {
            match self
                .close_transport_internal(transport_id, Some(session))
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(transport_id = %transport_id, "Transport cleanup failed: {}", e),
            }
        }

        self.sessions.remove(session).await;
        info!(
            session_id = %session,
            "🔌 Session released ({} transports, {} producers, {} consumers)",
            owned.transports.len(),
            owned.producers.len(),
            owned.consumers.len()
        );
    }

    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::TransportFailed { handle } => {
                let Some(transport_id) = self.registry.find_transport_by_handle(&handle).await
                else {
                    debug!("Failure reported for unknown transport handle {}", handle);
                    return;
                };
                warn!(transport_id = %transport_id, "⚠️ Engine reported transport failure");

                match self.close_transport_internal(&transport_id, None).await {
                    Ok(removed) => {
                        for transport in &removed.transports {
                            self.broadcaster
                                .notify(
                                    &transport.owner,
                                    Notification::TransportClosed(TransportClosed {
                                        transport_id: transport.id.clone(),
                                    }),
                                )
                                .await;
                        }
                    }
                    Err(e) => debug!(transport_id = %transport_id, "Transport already gone: {}", e),
                }
            }
        }
    }

    // ========== 内部 ==========

    async fn owned_transport(
        &self,
        session: &SessionId,
        transport_id: &ResourceId,
    ) -> Result<Entry<Transport>> {
        let entry = self.registry.transport(transport_id).await?;
        if &entry.owner != session {
            return Err(SignalingError::forbidden(
                ResourceKind::Transport,
                transport_id,
            ));
        }
        Ok(entry)
    }

    /// 释放注册表已移除的资源：关闭引擎资源、更新会话记录、通知受影响的 consumer 所有者
    async fn release(&self, removed: &Removed, initiator: Option<&SessionId>) {
        for consumer in &removed.consumers {
            self.engine.close_consumer(&consumer.value.handle);
        }
        for producer in &removed.producers {
            self.engine.close_producer(&producer.value.handle);
        }
        for transport in &removed.transports {
            self.engine.close_transport(&transport.value.handle);
        }

        for consumer in &removed.consumers {
            self.sessions
                .untrack(&consumer.owner, &OwnedResource::Consumer(consumer.id.clone()))
                .await;
            if Some(&consumer.owner) != initiator {
                self.broadcaster
                    .notify(
                        &consumer.owner,
                        Notification::ConsumerClosed(ConsumerClosed {
                            consumer_id: consumer.id.clone(),
                            producer_id: consumer.value.producer_id.clone(),
                        }),
                    )
                    .await;
            }
        }
        for producer in &removed.producers {
            self.sessions
                .untrack(&producer.owner, &OwnedResource::Producer(producer.id.clone()))
                .await;
        }
        for transport in &removed.transports {
            self.sessions
                .untrack(
                    &transport.owner,
                    &OwnedResource::Transport(transport.id.clone()),
                )
                .await;
        }
    }
}

/// produce/consume 的前置条件：transport 已连接且方向正确
fn require_ready(entry: &Entry<Transport>, role: TransportRole) -> Result<()> {
    if entry.value.state != TransportState::Connected {
        return Err(SignalingError::invalid_state(format!(
            "transport {} is {}, expected connected",
            entry.id, entry.value.state
        )));
    }
    if entry.value.role != role {
        return Err(SignalingError::invalid_state(format!(
            "transport {} is a {} transport",
            entry.id, entry.value.role
        )));
    }
    Ok(())
}
