//! SFU 信令服务器
//!
//! 每条 WebSocket 连接对应一个会话：接收任务解析 JSON 文本帧并交给
//! [`Dispatcher`]，发送任务把响应与通知写回客户端。任一方向结束即视为断开，
//! 随后释放会话名下的全部资源。

use crate::dispatcher::Dispatcher;
use crate::error::SignalingError;
use crate::ids::SessionId;
use crate::protocol::{self, ServerMessage};
use crate::ratelimit::{ConnectionRateLimiter, MessageRateLimiter};
use crate::routing::RoutingContext;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use media_engine::MediaEngine;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// 信令服务器状态
#[derive(Debug)]
pub struct SignalingServer {
    pub dispatcher: Arc<Dispatcher>,
    /// 连接速率限制器
    pub connection_rate_limiter: Option<Arc<ConnectionRateLimiter>>,
    /// 消息速率限制器
    pub message_rate_limiter: Option<Arc<MessageRateLimiter>>,
}

impl SignalingServer {
    pub fn new(routing: Arc<RoutingContext>, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(routing, engine)),
            connection_rate_limiter: None, // 在 axum_router 中根据配置初始化
            message_rate_limiter: None,    // 在 axum_router 中根据配置初始化
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// 监听引擎事件：transport 失败时只关闭该 transport
///
/// 必须在 tokio 运行时内调用。
pub fn spawn_engine_watcher(dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
    let mut events = dispatcher.engine().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => dispatcher.handle_engine_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Engine event watcher lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Engine event stream closed, watcher exiting");
                    break;
                }
            }
        }
    })
}

/// 处理 WebSocket 连接
pub async fn handle_websocket_connection(
    websocket: WebSocket,
    server: Arc<SignalingServer>,
    client_ip: Option<IpAddr>,
) -> Result<(), SignalingError> {
    // 分离读写流
    let (mut ws_sender, ws_receiver) = websocket.split();

    // 出站通道：响应与通知都经由它写回客户端
    let (outbound_tx, mut outbound_rx) = unbounded_channel::<ServerMessage>();

    let session_id = server
        .dispatcher
        .open_session(client_ip, outbound_tx.clone())
        .await;
    info!(
        "🔗 新 WebSocket 客户端连接: {} (IP: {:?})",
        session_id, client_ip
    );

    // 发送任务先结束时通知接收任务停止读取，但让它把当前请求处理完
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    // 处理客户端消息的任务
    let mut receive_task = tokio::spawn(receive_loop(
        ws_receiver,
        stop_rx,
        session_id.clone(),
        server.clone(),
        outbound_tx,
    ));

    // 处理发送消息的任务
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("序列化出站消息失败: {}", e);
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => {
            let _ = stop_tx.send(());
            if let Err(e) = receive_task.await {
                error!("接收任务异常结束 (session {}): {}", session_id, e);
            }
        }
    }

    // 释放会话资源
    cleanup_session(&session_id, &server).await;
    info!("🔌 客户端 {} 已断开连接", session_id);

    Ok(())
}

/// 读取客户端消息并逐条处理
///
/// 请求按到达顺序串行执行；`stop` 只在两条消息之间生效，
/// 正在执行的请求总会完整结束。
async fn receive_loop<S>(
    mut incoming: S,
    mut stop: oneshot::Receiver<()>,
    session_id: SessionId,
    server: Arc<SignalingServer>,
    outbound: UnboundedSender<ServerMessage>,
) where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = &mut stop => {
                debug!("发送端已关闭，停止读取 (session {})", session_id);
                break;
            }
            msg = incoming.next() => msg,
        };
        let Some(msg) = msg else {
            break;
        };
        match msg {
            Ok(WsMessage::Text(text)) => {
                handle_text_message(text.as_str(), &session_id, &server, &outbound).await;
            }
            Ok(WsMessage::Close(_)) => {
                info!("客户端 {} 主动断开连接", session_id);
                break;
            }
            Ok(WsMessage::Binary(_)) => {
                warn!("收到 Binary 消息，忽略 (session {})", session_id);
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket 错误: {}", e);
                break;
            }
        }
    }
}

/// 处理客户端发送的一条文本帧
async fn handle_text_message(
    text: &str,
    session_id: &SessionId,
    server: &SignalingServer,
    outbound: &UnboundedSender<ServerMessage>,
) {
    // 检查消息速率限制
    if let Some(ref limiter) = server.message_rate_limiter
        && let Err(reason) = limiter.check_message(session_id).await
    {
        warn!("🚫 会话 {} 消息速率限制触发: {}", session_id, reason);
        let error = SignalingError::RateLimited { reason };
        reply(
            outbound,
            ServerMessage::failure(protocol::peek_request_id(text), &error),
        );
        return;
    }

    let envelope = match protocol::parse_request(text) {
        Ok(envelope) => envelope,
        Err(failure) => {
            warn!("无法解析的请求 (session {}): {}", session_id, failure.error);
            reply(outbound, failure.into_response());
            return;
        }
    };

    let span = info_span!(
        "signaling.request",
        session_id = %session_id,
        method = envelope.request.method(),
        request_id = ?envelope.id
    );

    async move {
        debug!("📨 收到信令请求");
        let message = match server.dispatcher.dispatch(session_id, envelope.request).await {
            Ok(data) => ServerMessage::success(envelope.id, data),
            Err(e) => {
                warn!(code = e.code(), "请求失败: {}", e);
                ServerMessage::failure(envelope.id, &e)
            }
        };
        reply(outbound, message);
    }
    .instrument(span)
    .await
}

fn reply(outbound: &UnboundedSender<ServerMessage>, message: ServerMessage) {
    if outbound.send(message).is_err() {
        debug!("出站通道已关闭，丢弃响应");
    }
}

/// 清理会话
async fn cleanup_session(session_id: &SessionId, server: &SignalingServer) {
    server.dispatcher.disconnect(session_id).await;

    // 移除消息速率限制器
    if let Some(ref limiter) = server.message_rate_limiter {
        limiter.remove_session(session_id).await;
    }
}
