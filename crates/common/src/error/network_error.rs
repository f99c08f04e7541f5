//! 网络相关错误类型
//!
//! 定义所有与地址解析、端口绑定相关的错误

use thiserror::Error;

/// 网络相关错误
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid address format: {address}")]
    InvalidAddress { address: String },

    #[error("Port binding failed: {port}")]
    PortBindFailed { port: u16 },
}
