//! # Servobus Serial Transport
//!
//! 半双工串口传输层：把字节写到总线上，在给定超时内把字节读回来。
//!
//! - 所有 I/O 都是阻塞的，且都带显式超时，不会无限期阻塞
//! - 不做任何重试，重试策略由调用方决定
//! - 关闭后所有调用返回 [`TransportError::Closed`]
//!
//! 启用 `mock` feature 后可使用 [`mock::SimulatedBus`] 在无硬件环境下测试。

use std::time::Duration;
use thiserror::Error;

pub mod serial;

#[cfg(feature = "mock")]
pub mod mock;

pub use serial::SerialPortTransport;

/// 传输层错误（对当前调用均为致命错误，调用方可以重新连接）
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port '{path}' unavailable: {reason}")]
    PortUnavailable { path: String, reason: String },

    #[error("Read timeout")]
    Timeout,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port closed")]
    Closed,
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::Io(e.into())
    }
}

/// 串口传输抽象
///
/// 一个实例独占一个物理端口。实现必须保证每个读操作在 `timeout` 之后返回。
pub trait Transport: Send {
    /// 端口路径（用于日志）
    fn port_name(&self) -> &str;

    fn baud_rate(&self) -> u32;

    /// 切换波特率（总线全局生效）
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;

    /// 写出全部字节
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// 读取恰好 `n` 个字节，超时返回 [`TransportError::Timeout`]
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// 读取当前已到达的字节
    ///
    /// 若 `timeout` 内没有任何字节到达，返回空向量（静默不是错误）。
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// 丢弃输入缓冲区中的残留字节，使下一次读取从干净的帧边界开始
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// 关闭端口；之后的调用都返回 [`TransportError::Closed`]
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn port_name(&self) -> &str {
        (**self).port_name()
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        (**self).set_baud_rate(baud_rate)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_exact(n, timeout)
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_available(timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
