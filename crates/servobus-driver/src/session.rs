//! 总线会话
//!
//! [`BusSession`] 独占一个已打开的端口，是所有线路交换的唯一入口。
//! 每次交换都以 `&mut self` 进行，因此同一时刻最多只有一个请求在途；
//! 跨线程共享必须经过 [`SharedBus`](crate::SharedBus) 之类的显式同步。
//!
//! 每个请求发出前都会清空输入缓冲区，保证从干净的帧边界开始读取应答。
//! 损坏的应答作为错误返回，不自动重试。

use crate::config::TimeoutConfig;
use crate::error::{BusError, ExchangeError};
use servobus_protocol::{
    BROADCAST_ID, FrameError, FrameScanner, Packet, ProtocolVersion, RawReading, RegisterDescriptor,
    STATUS_PACKET_LEN, StatusPacket,
};
use servobus_serial::{SerialPortTransport, Transport, TransportError};
use std::time::Instant;
use tracing::{debug, trace};

/// 总线会话（不可 Clone）
pub struct BusSession {
    transport: Box<dyn Transport>,
    protocol: ProtocolVersion,
    timeouts: TimeoutConfig,
    scanner: FrameScanner,
}

impl BusSession {
    pub fn new(transport: Box<dyn Transport>, protocol: ProtocolVersion, timeouts: TimeoutConfig) -> Self {
        Self {
            transport,
            protocol,
            timeouts,
            scanner: FrameScanner::new(),
        }
    }

    /// 打开真实串口
    pub fn open(
        port: &str,
        baud_rate: u32,
        protocol: ProtocolVersion,
        timeouts: TimeoutConfig,
    ) -> Result<Self, TransportError> {
        let transport = SerialPortTransport::open(port, baud_rate)?;
        Ok(Self::new(Box::new(transport), protocol, timeouts))
    }

    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    pub fn baud_rate(&self) -> u32 {
        self.transport.baud_rate()
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        if self.transport.baud_rate() != baud_rate {
            self.transport.set_baud_rate(baud_rate)?;
        }
        Ok(())
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// 关闭端口，之后的交换都返回 `TransportError::Closed`
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// 发出一帧，不等待应答（广播写、同步写）
    pub fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.transport.clear_input()?;
        self.transport.write_all(&packet.encode())?;
        trace!(
            id = packet.id(),
            instruction = ?packet.instruction(),
            "sent {} param bytes",
            packet.params().len()
        );
        Ok(())
    }

    /// 一次完整的请求/应答交换
    ///
    /// `reply_params` 为预期应答的参数字节数，用于计算超时和首次读取长度。
    /// 应答前的噪声字节会被跳过；应答 ID 与请求不符、校验失败都作为错误返回。
    /// 状态帧错误位原样返回，由调用方决定如何处理。
    pub fn transact(&mut self, packet: &Packet, reply_params: usize) -> Result<StatusPacket, ExchangeError> {
        self.send(packet)?;

        let expected = STATUS_PACKET_LEN + reply_params;
        let timeout = self.timeouts.packet_timeout(self.baud_rate(), expected);
        let deadline = Instant::now() + timeout;

        self.scanner.clear();
        let first = self.transport.read_exact(expected, timeout)?;
        self.scanner.extend(&first);

        loop {
            if let Some(result) = self.scanner.next_frame() {
                let frame = result?;
                if frame.id != packet.id() {
                    return Err(FrameError::UnexpectedId {
                        expected: packet.id(),
                        actual: frame.id,
                    }
                    .into());
                }
                let status = frame.into_status();
                trace!(id = status.id, error = %status.error, "reply {:02X?}", status.params);
                return Ok(status);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout.into());
            }
            let more = self.transport.read_available(remaining)?;
            self.scanner.extend(&more);
        }
    }

    /// 交换并检查状态帧错误位
    pub fn request(&mut self, packet: &Packet, reply_params: usize) -> Result<StatusPacket, BusError> {
        let status = self.transact(packet, reply_params)?;
        if !status.error.is_ok() {
            return Err(BusError::DeviceFault {
                id: status.id,
                flags: status.error,
            });
        }
        Ok(status)
    }

    /// 读取寄存器原始值
    pub fn read_raw(&mut self, id: u8, register: &RegisterDescriptor) -> Result<RawReading, BusError> {
        let width = register.width.bytes();
        let packet = Packet::read(id, register.wire_address()?, width as u8)?;
        let status = self.request(&packet, width)?;
        let reading = register.decode(&status.params, self.protocol.byte_order())?;
        debug!(id, register = register.name, value = reading.value, "read");
        Ok(reading)
    }

    /// 写入寄存器原始值（写入前检查范围和访问权限）
    ///
    /// 广播 ID 不等待应答。
    pub fn write_raw(&mut self, id: u8, register: &RegisterDescriptor, value: i64) -> Result<(), BusError> {
        if !register.is_writable() {
            return Err(BusError::ReadOnlyRegister(register.name));
        }
        let data = register.encode(value, self.protocol.byte_order())?;
        let packet = Packet::write(id, register.wire_address()?, &data)?;
        if id == BROADCAST_ID {
            self.send(&packet)?;
        } else {
            self.request(&packet, 0)?;
        }
        debug!(id, register = register.name, value, "write");
        Ok(())
    }

    /// Ping 单个设备，无应答返回 `false`
    pub fn ping(&mut self, id: u8) -> Result<bool, BusError> {
        match self.request(&Packet::ping(id)?, 0) {
            Ok(_) => Ok(true),
            Err(BusError::Transport(TransportError::Timeout)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for BusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSession")
            .field("port", &self.port_name())
            .field("baud_rate", &self.baud_rate())
            .field("protocol", &self.protocol)
            .field("connected", &self.is_connected())
            .finish()
    }
}
