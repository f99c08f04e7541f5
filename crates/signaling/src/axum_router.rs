//! Axum Router 集成
//!
//! 提供 SignalingServer 的 Axum Router 适配器

use crate::ratelimit::{ConnectionRateLimiter, MessageRateLimiter};
use crate::routing::{RoutingContext, listen_options_from_config, media_codecs_from_config};
use crate::server::{SignalingServer, handle_websocket_connection, spawn_engine_watcher};
use anyhow::{Context as _, Result};
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use media_engine::{LocalEngine, MediaEngine};
use relay_common::config::RelayConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Signaling Server 状态（用于 Axum State）
#[derive(Clone)]
pub struct SignalingState {
    pub server: Arc<SignalingServer>,
}

/// 按配置构建信令服务器
///
/// 创建本地媒体引擎与路由上下文，初始化速率限制器，并启动引擎事件监听任务。
pub async fn build_signaling_server(config: &RelayConfig) -> Result<Arc<SignalingServer>> {
    info!("Creating signaling server with config");

    let codecs = media_codecs_from_config(&config.media)?;
    let listen_options = listen_options_from_config(&config.media)?;
    let engine = LocalEngine::new(&codecs).context("Failed to create media engine")?;
    let routing = Arc::new(RoutingContext::new(
        engine.rtp_capabilities(),
        listen_options,
    ));
    info!(
        "✅ Routing context ready: {} codecs, RTC ports {}-{}",
        routing.rtp_capabilities().codecs.len(),
        config.media.rtc_min_port,
        config.media.rtc_max_port
    );

    let mut server = SignalingServer::new(routing, Arc::new(engine));

    let rate_limit_config = &config.signaling.rate_limit;

    // 初始化连接速率限制器
    if rate_limit_config.connection.enabled {
        info!(
            "Initializing connection rate limiter: {}/min, burst: {}, max concurrent: {}/IP",
            rate_limit_config.connection.per_minute,
            rate_limit_config.connection.burst_size,
            rate_limit_config.connection.max_concurrent_per_ip
        );
        server.connection_rate_limiter = Some(Arc::new(ConnectionRateLimiter::new(
            rate_limit_config.connection.clone(),
        )));
    } else {
        info!("⚠️  Connection rate limiting is disabled");
    }

    // 初始化消息速率限制器
    if rate_limit_config.message.enabled {
        info!(
            "Initializing message rate limiter: {}/sec, burst: {}",
            rate_limit_config.message.per_second, rate_limit_config.message.burst_size
        );
        server.message_rate_limiter = Some(Arc::new(MessageRateLimiter::new(
            rate_limit_config.message.clone(),
        )));
    } else {
        info!("⚠️  Message rate limiting is disabled");
    }

    spawn_engine_watcher(server.dispatcher.clone());

    Ok(Arc::new(server))
}

/// 为已构建的服务器创建 Router：`{ws_path}` WebSocket 与 `/health`
pub fn signaling_router(server: Arc<SignalingServer>, ws_path: &str) -> Router {
    let state = SignalingState { server };

    let router = Router::new()
        .route(ws_path, get(websocket_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    info!("Signaling Axum router created successfully");
    router
}

async fn health_handler(State(state): State<SignalingState>) -> impl IntoResponse {
    let sessions = state.server.dispatcher.sessions().len().await;
    format!("OK ({sessions} sessions)")
}

/// WebSocket 升级处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let client_ip = addr.ip();

    // 检查连接速率限制
    if let Some(ref limiter) = state.server.connection_rate_limiter
        && let Err(e) = limiter.check_connection(client_ip).await
    {
        warn!("🚫 IP {} 连接速率限制触发: {}", client_ip, e);
        return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state, client_ip))
}

/// WebSocket 连接处理
async fn handle_websocket(socket: WebSocket, state: SignalingState, client_ip: IpAddr) {
    info!("📡 新 WebSocket 连接: IP={}", client_ip);

    // 增加连接计数
    if let Some(ref limiter) = state.server.connection_rate_limiter {
        limiter.increment_connection(client_ip).await;
    }

    if let Err(e) = handle_websocket_connection(socket, state.server.clone(), Some(client_ip)).await
    {
        error!("WebSocket connection error: {}", e);
    }

    // 减少连接计数
    if let Some(ref limiter) = state.server.connection_rate_limiter {
        limiter.decrement_connection(client_ip).await;
    }
}
