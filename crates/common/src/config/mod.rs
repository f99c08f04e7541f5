//! 统一配置管理系统
//!
//! 本模块是 sfu-relay 配置的"单一真理之源"。
//! 所有配置项的定义、文档、默认值都在这里统一管理。

pub mod bind;
pub mod media;
pub mod signaling;

pub use crate::config::bind::{BindConfig, HttpBindConfig};
pub use crate::config::media::{MediaCodecConfig, MediaConfig};
pub use crate::config::signaling::{
    ConnectionRateLimit, MessageRateLimit, RateLimitConfig, SignalingConfig,
};
use crate::error::SerializationError;
use serde::{Deserialize, Serialize};

/// sfu-relay 的主配置结构体
///
/// 配置文件使用 TOML 格式，支持完整的类型安全加载。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelayConfig {
    /// 服务器实例名称
    ///
    /// 用于在多节点部署中区分实例，如 relay-01、relay-prod-east-1。
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境
    /// - "prod": 生产环境，启用更严格的检查
    /// - "test": 测试环境，用于自动化测试
    pub env: String,

    /// 位置标签
    ///
    /// 用于标识服务器的地理位置或逻辑分组，便于运维管理。
    #[serde(default = "default_location_tag")]
    pub location_tag: String,

    /// 网络绑定配置
    #[serde(default)]
    pub bind: BindConfig,

    /// 媒体引擎配置（监听地址、端口范围、路由编码）
    #[serde(default)]
    pub media: MediaConfig,

    /// 信令服务配置
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// 可观测性配置（日志）
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,tower_http=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 日志轮转开关
    ///
    /// 当 output = "file" 时有效：true 按天轮转，false 追加到单个文件
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_location_tag() -> String {
    "default-location".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "sfu-relay-default".to_string(),
            env: "dev".to_string(),
            location_tag: default_location_tag(),
            bind: BindConfig::default(),
            media: MediaConfig::default(),
            signaling: SignalingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RelayConfig {
    /// 返回可观测性配置引用
    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// 返回日志配置引用
    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    /// 检查是否使用控制台日志输出
    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    /// 获取日志过滤级别，优先使用 RUST_LOG
    pub fn get_filter_level(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.observability.filter_level.clone())
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(format!("Configuration file does not exist: {path_ref:?}").into());
        }

        if !path_ref.is_file() {
            return Err(format!("Path is not a valid file: {path_ref:?}").into());
        }

        let content = std::fs::read_to_string(path_ref)?;
        Ok(Self::from_toml(&content)?)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, SerializationError> {
        Ok(toml::from_str(content)?)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, SerializationError> {
        Ok(toml::to_string(self)?)
    }

    /// 验证配置有效性
    ///
    /// 返回的错误列表中，以 "Warning:" 开头的条目只是警告，不阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        // 验证过滤级别（EnvFilter 语法）
        {
            let main_level = self
                .observability
                .filter_level
                .split(',')
                .next()
                .unwrap_or("")
                .trim();
            if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
                errors.push(format!(
                    "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                    self.observability.filter_level
                ));
            }
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        if let Err(bind_errors) = self.bind.validate() {
            errors.extend(bind_errors);
        }

        if let Err(media_errors) = self.media.validate(self.env == "prod") {
            errors.extend(media_errors);
        }

        if let Err(signaling_errors) = self.signaling.validate() {
            errors.extend(signaling_errors);
        }

        // 生产环境额外检查
        if self.env == "prod" {
            if self.observability.log.output == "console" {
                errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
            }
            if self.observability.log.output == "file" && !self.observability.log.rotate {
                errors.push("Warning: Production environment should enable log rotation (observability.log.rotate = true)".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 判断校验结果中是否存在非警告错误
pub fn has_critical_errors(errors: &[String]) -> bool {
    errors.iter().any(|e| !e.starts_with("Warning:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.name, "sfu-relay-default");
        assert_eq!(config.env, "dev");
        assert_eq!(config.media.codecs.len(), 2);
        assert!(config.is_console_logging());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_keeps_media_codecs() {
        let config = RelayConfig::default();
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("name = \"sfu-relay-default\""));
        assert!(toml_str.contains("mime_type = \"audio/opus\""));

        let parsed = RelayConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.name, config.name);
        assert_eq!(parsed.media.codecs, config.media.codecs);
        assert_eq!(parsed.bind.http.port, config.bind.http.port);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RelayConfig::from_toml(
            r#"
            name = "relay-test"
            env = "test"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind.http.port, 3002);
        assert_eq!(config.signaling.ws_path, "/ws");
        assert!(config.media.enable_udp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_serialization_error() {
        let err = RelayConfig::from_toml("name = ").unwrap_err();
        assert!(matches!(err, SerializationError::Toml(_)));
        assert!(err.to_string().starts_with("TOML error"));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = RelayConfig::default();
        config.name = " ".to_string();
        config.env = "staging".to_string();
        config.observability.filter_level = "loud".to_string();
        config.observability.log.output = "syslog".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(has_critical_errors(&errors));
    }

    #[test]
    fn test_prod_console_logging_is_only_a_warning() {
        let mut config = RelayConfig::default();
        config.env = "prod".to_string();
        config.media.announced_ip = Some("203.0.113.7".to_string());

        let errors = config.validate().unwrap_err();
        assert!(!errors.is_empty());
        assert!(!has_critical_errors(&errors));
    }

    #[test]
    #[serial_test::serial]
    fn test_filter_level_respects_rust_log() {
        let config = RelayConfig::default();
        let previous = std::env::var("RUST_LOG").ok();

        // SAFETY: 测试串行执行，不存在并发读写环境变量
        unsafe { std::env::set_var("RUST_LOG", "debug,tower_http=warn") };
        assert_eq!(config.get_filter_level(), "debug,tower_http=warn");

        unsafe { std::env::set_var("RUST_LOG", "  ") };
        assert_eq!(config.get_filter_level(), "info");

        match previous {
            Some(value) => unsafe { std::env::set_var("RUST_LOG", value) },
            None => unsafe { std::env::remove_var("RUST_LOG") },
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            name = "relay-file"
            env = "dev"

            [bind.http]
            port = 4100

            [media]
            announced_ip = "192.0.2.10"
            rtc_min_port = 41000
            rtc_max_port = 41010
            "#,
        )
        .unwrap();

        let config = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config.name, "relay-file");
        assert_eq!(config.bind.http.port, 4100);
        assert_eq!(config.media.rtc_max_port, 41010);
        assert_eq!(config.media.codecs.len(), 2);

        assert!(RelayConfig::from_file(dir.path().join("missing.toml")).is_err());
        assert!(RelayConfig::from_file(dir.path()).is_err());
    }
}
