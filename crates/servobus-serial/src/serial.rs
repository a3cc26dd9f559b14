//! 基于 `serialport` 的真实串口实现（8N1，无流控）

use crate::{Transport, TransportError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 单次底层读调用的最长阻塞时间
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 串口传输
pub struct SerialPortTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortTransport {
    /// 打开串口
    ///
    /// # 错误
    /// - `TransportError::PortUnavailable`: 设备不存在、被占用或无权限
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(|e| TransportError::PortUnavailable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!(port = path, baud_rate, "Serial port opened");
        Ok(Self {
            path: path.to_string(),
            baud_rate,
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// 单次带超时的读；超时返回 `Ok(0)`
    fn read_once(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout.max(Duration::from_micros(100)))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for SerialPortTransport {
    fn port_name(&self) -> &str {
        &self.path
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.port()?.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        debug!(port = %self.path, baud_rate, "Baud rate changed");
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        Write::write_all(port, bytes)?;
        port.flush()?;
        trace!(port = %self.path, "tx {:02X?}", bytes);
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                trace!(port = %self.path, wanted = n, got = filled, "read timeout");
                return Err(TransportError::Timeout);
            }
            filled += self.read_once(&mut buf[filled..], remaining)?;
        }

        trace!(port = %self.path, "rx {:02X?}", buf);
        Ok(buf)
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let pending = self.port()?.bytes_to_read()? as usize;
        let mut buf = vec![0u8; pending.max(64)];
        let n = self.read_once(&mut buf, timeout)?;
        buf.truncate(n);
        if n > 0 {
            trace!(port = %self.path, "rx {:02X?}", buf);
        }
        Ok(buf)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.path, "Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port() {
        let result = SerialPortTransport::open("/dev/servobus-does-not-exist", 1_000_000);
        match result {
            Err(TransportError::PortUnavailable { path, .. }) => {
                assert_eq!(path, "/dev/servobus-does-not-exist");
            },
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opening a missing port must fail"),
        }
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let mut transport = SerialPortTransport {
            path: "test".to_string(),
            baud_rate: 1_000_000,
            port: None,
        };
        assert!(!transport.is_open());
        assert!(matches!(transport.write_all(&[0xFF]), Err(TransportError::Closed)));
        assert!(matches!(
            transport.read_exact(1, Duration::from_secs(1)),
            Err(TransportError::Closed)
        ));
        assert!(matches!(transport.set_baud_rate(9600), Err(TransportError::Closed)));
        assert!(matches!(transport.clear_input(), Err(TransportError::Closed)));
        transport.close();
    }
}
