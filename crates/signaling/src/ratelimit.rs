//! Signaling 服务速率限制
//!
//! 实现双重速率限制：
//! 1. **连接速率限制**：限制每个 IP 建立新 WebSocket 连接的速率和并发数
//! 2. **消息速率限制**：限制每个会话发送请求的速率
//!
//! 使用 governor crate 实现，支持配置化

use crate::ids::SessionId;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use relay_common::config::signaling::{ConnectionRateLimit, MessageRateLimit};
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use tokio::sync::RwLock;
use tracing::{debug, warn};

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// 连接速率限制器（基于 IP）
#[derive(Debug)]
pub struct ConnectionRateLimiter {
    config: ConnectionRateLimit,
    /// 每个 IP 的速率限制器
    limiters: RwLock<HashMap<IpAddr, DefaultDirectRateLimiter>>,
    /// 每个 IP 的当前连接数
    connections: RwLock<HashMap<IpAddr, u32>>,
}

impl ConnectionRateLimiter {
    pub fn new(config: ConnectionRateLimit) -> Self {
        Self {
            config,
            limiters: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 检查是否允许新连接
    pub async fn check_connection(&self, ip: IpAddr) -> Result<(), String> {
        if !self.config.enabled {
            return Ok(());
        }

        // 检查并发连接数
        let connections = self.connections.read().await;
        if let Some(&count) = connections.get(&ip)
            && count >= self.config.max_concurrent_per_ip
        {
            warn!(
                "IP {} exceeded max concurrent connections: {}/{}",
                ip, count, self.config.max_concurrent_per_ip
            );
            return Err(format!(
                "Too many concurrent connections from your IP: {}/{}",
                count, self.config.max_concurrent_per_ip
            ));
        }
        drop(connections);

        // 检查连接速率
        let mut limiters = self.limiters.write().await;
        let limiter = limiters.entry(ip).or_insert_with(|| {
            // 每分钟 per_minute 个连接，向上取整为每秒
            let per_second = non_zero(self.config.per_minute.div_ceil(60));
            let quota =
                Quota::per_second(per_second).allow_burst(non_zero(self.config.burst_size));
            RateLimiter::direct(quota)
        });

        match limiter.check() {
            Ok(_) => {
                debug!("IP {} passed connection rate limit check", ip);
                Ok(())
            }
            Err(_) => {
                warn!("IP {} exceeded connection rate limit", ip);
                Err(format!(
                    "Too many connection attempts. Limit: {} connections/minute",
                    self.config.per_minute
                ))
            }
        }
    }

    /// 增加连接计数
    pub async fn increment_connection(&self, ip: IpAddr) {
        if !self.config.enabled {
            return;
        }

        let mut connections = self.connections.write().await;
        let count = connections.entry(ip).or_insert(0);
        *count += 1;
        debug!("IP {} connection count: {}", ip, count);
    }

    /// 减少连接计数
    pub async fn decrement_connection(&self, ip: IpAddr) {
        if !self.config.enabled {
            return;
        }

        let mut connections = self.connections.write().await;
        if let Some(count) = connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            debug!("IP {} connection count decreased to: {}", ip, count);

            // 连接数为 0 时移除记录以节省内存
            if *count == 0 {
                connections.remove(&ip);
            }
        }
    }

    /// (限速器数量, 有活动连接的 IP 数量)
    pub async fn stats(&self) -> (usize, usize) {
        let limiters = self.limiters.read().await;
        let connections = self.connections.read().await;
        (limiters.len(), connections.len())
    }
}

/// 消息速率限制器（基于会话）
#[derive(Debug)]
pub struct MessageRateLimiter {
    config: MessageRateLimit,
    limiters: RwLock<HashMap<SessionId, DefaultDirectRateLimiter>>,
}

impl MessageRateLimiter {
    pub fn new(config: MessageRateLimit) -> Self {
        Self {
            config,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// 检查是否允许处理该会话的下一条消息
    pub async fn check_message(&self, session: &SessionId) -> Result<(), String> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut limiters = self.limiters.write().await;
        let limiter = limiters.entry(session.clone()).or_insert_with(|| {
            let quota = Quota::per_second(non_zero(self.config.per_second))
                .allow_burst(non_zero(self.config.burst_size));
            RateLimiter::direct(quota)
        });

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("Session {} exceeded message rate limit", session);
                Err(format!(
                    "Too many messages. Limit: {} messages/second",
                    self.config.per_second
                ))
            }
        }
    }

    /// 移除会话的速率限制器（连接关闭时调用）
    pub async fn remove_session(&self, session: &SessionId) {
        if !self.config.enabled {
            return;
        }

        let mut limiters = self.limiters.write().await;
        limiters.remove(session);
        debug!("Removed rate limiter for session {}", session);
    }

    pub async fn stats(&self) -> usize {
        self.limiters.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_connection_increment_decrement() {
        let limiter = ConnectionRateLimiter::new(ConnectionRateLimit::default());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        limiter.increment_connection(ip).await;
        let (_, conn_count) = limiter.stats().await;
        assert_eq!(conn_count, 1);

        limiter.decrement_connection(ip).await;
        let (_, conn_count) = limiter.stats().await;
        assert_eq!(conn_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_connection_cap() {
        let limiter = ConnectionRateLimiter::new(ConnectionRateLimit {
            max_concurrent_per_ip: 1,
            ..Default::default()
        });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(limiter.check_connection(ip).await.is_ok());
        limiter.increment_connection(ip).await;
        assert!(limiter.check_connection(ip).await.is_err());

        limiter.decrement_connection(ip).await;
        assert!(limiter.check_connection(ip).await.is_ok());
    }

    #[tokio::test]
    async fn test_message_burst_is_enforced() {
        let limiter = MessageRateLimiter::new(MessageRateLimit {
            enabled: true,
            per_second: 1,
            burst_size: 2,
        });
        let session = SessionId::generate();

        assert!(limiter.check_message(&session).await.is_ok());
        assert!(limiter.check_message(&session).await.is_ok());
        assert!(limiter.check_message(&session).await.is_err());

        // 其它会话不受影响
        assert!(limiter.check_message(&SessionId::generate()).await.is_ok());
    }

    #[tokio::test]
    async fn test_message_limiter_removal() {
        let limiter = MessageRateLimiter::new(MessageRateLimit::default());
        let session = SessionId::generate();

        let _ = limiter.check_message(&session).await;
        assert_eq!(limiter.stats().await, 1);

        limiter.remove_session(&session).await;
        assert_eq!(limiter.stats().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let limiter = MessageRateLimiter::new(MessageRateLimit {
            enabled: false,
            per_second: 1,
            burst_size: 1,
        });
        let session = SessionId::generate();
        for _ in 0..10 {
            assert!(limiter.check_message(&session).await.is_ok());
        }
        assert_eq!(limiter.stats().await, 0);
    }
}
