//! HTTP 服务
//!
//! 信令 WebSocket 与健康检查挂载在 `/signaling` 下，共用一个监听地址。

use crate::trace::http_trace_layer;
use anyhow::Result;
use axum::Router;
use relay_common::config::RelayConfig;
use relay_common::error::{BaseError, NetworkError};
use signaling::{SignalingServer, build_signaling_server, signaling_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub const SIGNALING_PREFIX: &str = "/signaling";

/// 已构建但尚未监听的 HTTP 应用
pub struct HttpApp {
    pub router: Router,
    pub signaling: Arc<SignalingServer>,
}

/// 按配置构建完整的 HTTP 应用
pub async fn build_app(config: &RelayConfig) -> Result<HttpApp> {
    info!("Building Signaling router");
    let signaling = build_signaling_server(config).await?;

    let router = Router::new()
        .nest(
            SIGNALING_PREFIX,
            signaling_router(signaling.clone(), &config.signaling.ws_path),
        )
        .layer(http_trace_layer())
        .layer(CorsLayer::permissive());

    info!(
        "Adding route '{}' for service 'Signaling Service'",
        SIGNALING_PREFIX
    );
    Ok(HttpApp { router, signaling })
}

/// 解析并绑定监听地址
pub async fn bind_listener(config: &RelayConfig) -> std::result::Result<TcpListener, BaseError> {
    let http_config = &config.bind.http;
    let addr = http_config
        .socket_addr()
        .map_err(|_| NetworkError::InvalidAddress {
            address: format!("{}:{}", http_config.ip, http_config.port),
        })?;

    TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address '{}': {}", addr, e);
        BaseError::from(NetworkError::PortBindFailed {
            port: http_config.port,
        })
    })
}

/// 启动 HTTP 服务器，收到关闭信号后优雅退出
pub fn serve(
    listener: TcpListener,
    app: HttpApp,
    shutdown_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let local_addr = listener.local_addr().ok();
    info!("HTTP server listening on {:?}", local_addr);

    tokio::spawn(async move {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let server = axum::serve(
            listener,
            app.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP server received shutdown signal");
        });
        if let Err(e) = server.await {
            error!("HTTP server error: {}", e);
            let _ = shutdown_tx.send(());
        }
        info!("HTTP server stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_health_is_nested_under_prefix() {
        let mut config = RelayConfig::default();
        config.bind.http.ip = "127.0.0.1".to_string();
        config.bind.http.port = 0;

        let app = build_app(&config).await.unwrap();
        let listener = bind_listener(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = serve(listener, app, shutdown_tx.clone());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /signaling/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("OK (0 sessions)"));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let mut config = RelayConfig::default();
        config.bind.http.ip = "not-an-ip".to_string();
        let err = bind_listener(&config).await.unwrap_err();
        assert!(matches!(
            err,
            BaseError::Network(NetworkError::InvalidAddress { .. })
        ));
    }
}
