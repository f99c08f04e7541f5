//! sfu-relay 主程序
//!
//! 加载配置、初始化日志，启动信令 HTTP/WebSocket 服务，Ctrl-C 时优雅关闭

mod cli;

use clap::Parser;
use relay_common::config::{RelayConfig, has_critical_errors};
use relay_common::error::ConfigError;
use sfu_relay::error::{Error, Result};
use sfu_relay::http::{self, SIGNALING_PREFIX};
use sfu_relay::observability::init_observability;
use std::path::{Path, PathBuf};
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            // Create Tokio runtime（before running the application）
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            // Run the asynchronous application
            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // If the provided path is not the default "config.toml", check if it exists
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(relay_common::error::BaseError::from(ConfigError::FileNotFound {
                    path: provided_path.display().to_string(),
                })
                .into());
            }
        }

        // Otherwise, try fallback locations
        let fallback_paths = vec![
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from("/etc/sfu-relay/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: sfu-relay --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 逐条打印校验结果，返回是否存在非警告错误
    fn report_validation(errors: &[String], print: impl Fn(bool, String)) -> bool {
        for (i, err) in errors.iter().enumerate() {
            if err.starts_with("Warning:") {
                print(false, format!("  {}. ⚠️  {}", i + 1, err));
            } else {
                print(true, format!("  {}. ❌ {}", i + 1, err));
            }
        }
        has_critical_errors(errors)
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        // Initialize basic logging for test command
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        let config = match RelayConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                return Err(Error::service_validation(format!("配置解析失败: {e}")));
            }
        };
        info!("✅ 配置文件解析成功: {:?}", config_path);

        if let Err(errors) = config.validate() {
            error!("❌ 配置验证发现问题:");
            let has_errors = Self::report_validation(&errors, |critical, line| {
                if critical {
                    error!("{}", line);
                } else {
                    info!("{}", line);
                }
            });
            if has_errors {
                return Err(Error::service_validation("配置验证失败".to_string()));
            }
        }

        info!("✅ 完整配置验证通过");
        Ok(())
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = match RelayConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                bootstrap_error!("❌ 配置加载失败: {}", e);
                return Err(Error::custom(format!("配置加载失败: {e}")));
            }
        };
        bootstrap_info!("✅ 配置加载成功");

        if let Err(errors) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            let has_errors = Self::report_validation(&errors, |critical, line| {
                if critical {
                    bootstrap_error!("{}", line);
                } else {
                    bootstrap_info!("{}", line);
                }
            });
            if has_errors {
                return Err(relay_common::error::BaseError::from(ConfigError::Invalid {
                    errors: errors
                        .into_iter()
                        .filter(|e| !e.starts_with("Warning:"))
                        .collect(),
                })
                .into());
            }
        }

        // 初始化日志（守卫需存活到进程结束）
        let _observability_guard = init_observability(&config)?;

        Self::run_services(config).await
    }

    async fn run_services(config: RelayConfig) -> Result<()> {
        info!("🚀 启动 sfu-relay 信令服务 ({}, env={})", config.name, config.env);

        // 初始化全局关闭通道
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(10);
        setup_ctrl_c_handler(shutdown_tx.clone()).await;

        let app = http::build_app(&config)
            .await
            .map_err(|e| Error::service_startup(format!("Signaling 初始化失败: {e}")))?;
        let listener = http::bind_listener(&config).await?;

        Self::display_service_info(&config);

        let handle = http::serve(listener, app, shutdown_tx.clone());
        if let Err(e) = handle.await {
            error!("Service task terminated unexpectedly: {}", e);
            return Err(e.into());
        }

        info!("🛑 所有服务已安全关闭");
        Ok(())
    }

    /// 显示服务信息
    fn display_service_info(config: &RelayConfig) {
        let http_config = &config.bind.http;
        let http_url = format!("http://{}:{}", http_config.domain_name, http_config.port);
        let ws_url = format!("ws://{}:{}", http_config.domain_name, http_config.port);

        info!("✅ 所有服务已启动");
        info!("📡 HTTP 服务器监听在: {}:{}", http_config.ip, http_config.port);
        info!("🔧 可用的API端点:");
        info!(
            "  - {}{}{}",
            ws_url, SIGNALING_PREFIX, config.signaling.ws_path
        );
        info!("  - {}{}/health", http_url, SIGNALING_PREFIX);
        info!(
            "🎛️ 媒体端口范围: {}-{} (announced: {})",
            config.media.rtc_min_port,
            config.media.rtc_max_port,
            config.media.announced_ip.as_deref().unwrap_or("-")
        );
    }
}

/// 设置Ctrl-C信号处理程序
async fn setup_ctrl_c_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        let _ = shutdown_tx.send(());
    });
}
