//! 测试用引擎：包装 [`LocalEngine`]，可在指定操作完成后挂起，
//! 用来构造"引擎已创建资源、注册表尚未写入"的并发场景。

use async_trait::async_trait;
use media_engine::{
    DtlsParameters, EngineConsumer, EngineEvent, EngineHandle, EngineProducer, EngineTransport,
    LocalEngine, MediaEngine, MediaKind, Result, RtpCapabilities, RtpParameters,
    TransportListenOptions, default_media_codecs,
};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineOp {
    CreateTransport,
    Produce,
    Consume,
}

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct GatedEngine {
    pub inner: Arc<LocalEngine>,
    gate: Mutex<Option<EngineOp>>,
    entered: Notify,
    release: Notify,
    before_can_consume: Mutex<Option<Hook>>,
}

impl fmt::Debug for GatedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedEngine")
            .field("inner", &self.inner)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl GatedEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LocalEngine::new(&default_media_codecs()).unwrap()),
            gate: Mutex::new(None),
            entered: Notify::new(),
            release: Notify::new(),
            before_can_consume: Mutex::new(None),
        }
    }

    /// 下一次 `can_consume` 应答前先执行 `hook`
    pub fn before_can_consume(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_can_consume.lock().unwrap() = Some(Box::new(hook));
    }

    /// 下一次 `op` 在引擎完成后挂起，直到 [`GatedEngine::release`]
    pub fn arm(&self, op: EngineOp) {
        *self.gate.lock().unwrap() = Some(op);
    }

    /// 等待被拦截的操作进入挂起状态
    pub async fn wait_parked(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn park(&self, op: EngineOp) {
        let armed = {
            let mut gate = self.gate.lock().unwrap();
            if *gate == Some(op) {
                gate.take();
                true
            } else {
                false
            }
        };
        if armed {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl MediaEngine for GatedEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    async fn create_transport(&self, options: &TransportListenOptions) -> Result<EngineTransport> {
        let result = self.inner.create_transport(options).await;
        self.park(EngineOp::CreateTransport).await;
        result
    }

    async fn connect_transport(
        &self,
        transport: &EngineHandle,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()> {
        self.inner.connect_transport(transport, dtls_parameters).await
    }

    async fn produce(
        &self,
        transport: &EngineHandle,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer> {
        let result = self.inner.produce(transport, kind, rtp_parameters).await;
        self.park(EngineOp::Produce).await;
        result
    }

    fn can_consume(&self, producer: &EngineHandle, rtp_capabilities: &RtpCapabilities) -> bool {
        let hook = self.before_can_consume.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.can_consume(producer, rtp_capabilities)
    }

    async fn consume(
        &self,
        transport: &EngineHandle,
        producer: &EngineHandle,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<EngineConsumer> {
        let result = self
            .inner
            .consume(transport, producer, rtp_capabilities, paused)
            .await;
        self.park(EngineOp::Consume).await;
        result
    }

    fn close_consumer(&self, consumer: &EngineHandle) {
        self.inner.close_consumer(consumer);
    }

    fn close_producer(&self, producer: &EngineHandle) {
        self.inner.close_producer(producer);
    }

    fn close_transport(&self, transport: &EngineHandle) {
        self.inner.close_transport(transport);
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.subscribe()
    }
}
