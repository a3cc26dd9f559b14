//! 模拟舵机总线
//!
//! [`SimulatedBus`] 是一条共享的虚拟线路，上面挂若干 [`SimulatedServo`]。
//! 每次 [`SimulatedBus::open`] 得到一个独立的 [`MockTransport`] 句柄，行为与真实
//! 串口一致：
//!
//! - 只有波特率与句柄一致的舵机才会应答
//! - 支持 Ping（含广播 Ping）、Read、Write、SyncWrite
//! - 主机写出的字节与主机读到的应答按发生顺序记录在线路日志中（[`WireEvent`]）
//! - 一个句柄的应答尚未读完时另一个句柄写入，视为总线冲突：计数并返回 I/O 错误
//! - 可注入故障：校验和损坏、前导噪声、静默、端口拒绝某个波特率

use crate::{Transport, TransportError};
use parking_lot::Mutex;
use servobus_protocol::{ByteOrder, Instruction, Packet, StatusFlags, StatusPacket, decode};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

const MEMORY_SIZE: usize = 256;
const ADDR_MODEL_NUMBER: usize = 3;
const ADDR_ID: usize = 5;
const ADDR_PRESENT_POSITION: usize = 56;

/// 空读时的最长等待
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// 注入的应答故障
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// 应答的校验和字节被翻转
    CorruptChecksum,
    /// 应答前插入噪声字节
    GarbagePrefix(Vec<u8>),
    /// 不应答
    Silent,
}

/// 模拟舵机
#[derive(Debug, Clone)]
pub struct SimulatedServo {
    baud_rate: u32,
    byte_order: ByteOrder,
    memory: [u8; MEMORY_SIZE],
    error_flags: u8,
    fault: Option<Fault>,
}

impl SimulatedServo {
    /// 创建小端（协议 0）舵机
    pub fn new(id: u8, model_number: u16, baud_rate: u32) -> Self {
        let mut servo = Self {
            baud_rate,
            byte_order: ByteOrder::LittleEndian,
            memory: [0; MEMORY_SIZE],
            error_flags: 0,
            fault: None,
        };
        servo.memory[ADDR_ID] = id;
        servo.put_word(ADDR_MODEL_NUMBER, model_number);
        servo
    }

    /// 切换字节序（已写入的型号编号按新字节序重写）
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        let model_number = self.word(ADDR_MODEL_NUMBER);
        self.byte_order = order;
        self.put_word(ADDR_MODEL_NUMBER, model_number);
        self
    }

    pub fn with_register(mut self, address: usize, bytes: &[u8]) -> Self {
        self.write_memory(address, bytes);
        self
    }

    /// 按舵机字节序写入 2 字节寄存器
    pub fn with_word(mut self, address: usize, value: u16) -> Self {
        self.put_word(address, value);
        self
    }

    pub fn with_position(self, raw: u16) -> Self {
        self.with_word(ADDR_PRESENT_POSITION, raw)
    }

    /// 应答帧中携带的错误位
    pub fn with_error_flags(mut self, flags: u8) -> Self {
        self.error_flags = flags;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn id(&self) -> u8 {
        self.memory[ADDR_ID]
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn word(&self, address: usize) -> u16 {
        self.byte_order.read_uint(&self.memory[address..address + 2]) as u16
    }

    fn put_word(&mut self, address: usize, value: u16) {
        let bytes = self.byte_order.write_uint(u32::from(value), 2);
        self.write_memory(address, &bytes);
    }

    fn read_memory(&self, address: usize, len: usize) -> Option<&[u8]> {
        self.memory.get(address..address.checked_add(len)?)
    }

    fn write_memory(&mut self, address: usize, data: &[u8]) -> bool {
        match address
            .checked_add(data.len())
            .and_then(|end| self.memory.get_mut(address..end))
        {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            },
            None => false,
        }
    }

    /// 生成应答字节（应用注入的故障）
    fn respond(&self, id: u8, params: Vec<u8>) -> Option<Vec<u8>> {
        let mut bytes = StatusPacket::new(id, StatusFlags(self.error_flags), params)
            .ok()?
            .encode();
        match &self.fault {
            None => Some(bytes),
            Some(Fault::Silent) => None,
            Some(Fault::CorruptChecksum) => {
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0xFF;
                }
                Some(bytes)
            },
            Some(Fault::GarbagePrefix(garbage)) => {
                let mut out = garbage.clone();
                out.append(&mut bytes);
                Some(out)
            },
        }
    }

    /// 处理一条请求，返回应答参数（`None` 表示不应答）
    fn handle(&mut self, packet: &Packet) -> Option<Vec<u8>> {
        let addressed = packet.id() == self.id();
        match packet.instruction() {
            Instruction::Ping if addressed || packet.is_broadcast() => Some(Vec::new()),
            Instruction::Read if addressed => match packet.params() {
                [address, len] => self
                    .read_memory(*address as usize, *len as usize)
                    .map(<[u8]>::to_vec),
                _ => None,
            },
            Instruction::Write if addressed || packet.is_broadcast() => {
                let (address, data) = packet.params().split_first()?;
                let written = self.write_memory(*address as usize, data);
                (addressed && written).then(Vec::new)
            },
            Instruction::SyncWrite => {
                if let [address, len, entries @ ..] = packet.params() {
                    let len = *len as usize;
                    let id = self.id();
                    for entry in entries.chunks(len + 1) {
                        if entry.len() == len + 1 && entry[0] == id {
                            self.write_memory(*address as usize, &entry[1..]);
                        }
                    }
                }
                None
            },
            _ => None,
        }
    }
}

/// 线路日志条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// 主机写出的字节
    Tx { handle: u64, bytes: Vec<u8> },
    /// 主机一次读取拿到的应答字节（被清空丢弃的字节不记录）
    Rx { handle: u64, bytes: Vec<u8> },
}

#[derive(Debug, Default)]
struct BusState {
    servos: Vec<SimulatedServo>,
    log: Vec<WireEvent>,
    next_handle: u64,
    /// 应答尚未读完的句柄
    in_flight: Option<u64>,
    collisions: usize,
    /// 适配器不接受的波特率
    rejected_baud_rates: Vec<u32>,
}

impl BusState {
    fn process(&mut self, baud_rate: u32, bytes: &[u8]) -> Vec<u8> {
        let packet = match decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("mock bus: undecodable request: {}", e);
                return Vec::new();
            },
        };

        let mut reply = Vec::new();
        for servo in self.servos.iter_mut().filter(|s| s.baud_rate == baud_rate) {
            let id = servo.id();
            let Some(params) = servo.handle(&packet) else {
                continue;
            };
            if let Some(bytes) = servo.respond(id, params) {
                reply.extend(bytes);
            }
        }
        reply
    }

    fn release(&mut self, handle: u64) {
        if self.in_flight == Some(handle) {
            self.in_flight = None;
        }
    }
}

/// 共享的模拟线路
///
/// # 示例
///
/// ```rust
/// use servobus_serial::Transport;
/// use servobus_serial::mock::{SimulatedBus, SimulatedServo};
/// use std::time::Duration;
///
/// let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, 1_000_000));
/// let mut port = bus.open("sim0", 1_000_000);
///
/// port.write_all(&[0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]).unwrap();
/// let reply = port.read_exact(6, Duration::from_millis(10)).unwrap();
/// assert_eq!(reply, vec![0xFF, 0xFF, 0x01, 0x02, 0x00, 0xFC]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servo(self, servo: SimulatedServo) -> Self {
        self.add_servo(servo);
        self
    }

    pub fn add_servo(&self, servo: SimulatedServo) {
        self.state.lock().servos.push(servo);
    }

    /// 打开一个新的句柄
    pub fn open(&self, port_name: &str, baud_rate: u32) -> MockTransport {
        let handle = {
            let mut state = self.state.lock();
            state.next_handle += 1;
            state.next_handle
        };
        MockTransport {
            bus: self.clone(),
            handle,
            port_name: port_name.to_string(),
            baud_rate,
            rx: VecDeque::new(),
            open: true,
        }
    }

    pub fn wire_log(&self) -> Vec<WireEvent> {
        self.state.lock().log.clone()
    }

    pub fn clear_wire_log(&self) {
        self.state.lock().log.clear();
    }

    /// 检测到的总线冲突次数
    pub fn collisions(&self) -> usize {
        self.state.lock().collisions
    }

    /// 读取舵机内存（测试断言用）
    pub fn memory(&self, id: u8, address: usize, len: usize) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let servo = state.servos.iter().find(|s| s.id() == id)?;
        servo.read_memory(address, len).map(<[u8]>::to_vec)
    }

    /// 按舵机字节序写入 2 字节寄存器
    pub fn set_word(&self, id: u8, address: usize, value: u16) {
        let mut state = self.state.lock();
        if let Some(servo) = state.servos.iter_mut().find(|s| s.id() == id) {
            servo.put_word(address, value);
        }
    }

    pub fn set_position(&self, id: u8, raw: u16) {
        self.set_word(id, ADDR_PRESENT_POSITION, raw);
    }

    /// 之后所有句柄切换到 `baud_rate` 时都返回 I/O 错误
    pub fn reject_baud_rate(&self, baud_rate: u32) {
        self.state.lock().rejected_baud_rates.push(baud_rate);
    }

    pub fn set_fault(&self, id: u8, fault: Option<Fault>) {
        let mut state = self.state.lock();
        if let Some(servo) = state.servos.iter_mut().find(|s| s.id() == id) {
            servo.fault = fault;
        }
    }
}

/// 模拟线路上的一个端口句柄
#[derive(Debug)]
pub struct MockTransport {
    bus: SimulatedBus,
    handle: u64,
    port_name: String,
    baud_rate: u32,
    rx: VecDeque<u8>,
    open: bool,
}

impl MockTransport {
    pub fn handle(&self) -> u64 {
        self.handle
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn release_if_drained(&self) {
        if self.rx.is_empty() {
            self.bus.state.lock().release(self.handle);
        }
    }

    /// 从接收缓冲取出字节交给主机，并在此刻记录 Rx
    fn deliver(&mut self, n: usize) -> Vec<u8> {
        let out: Vec<u8> = self.rx.drain(..n).collect();
        {
            let mut state = self.bus.state.lock();
            state.log.push(WireEvent::Rx {
                handle: self.handle,
                bytes: out.clone(),
            });
            if self.rx.is_empty() {
                state.release(self.handle);
            }
        }
        out
    }
}

impl Transport for MockTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.bus.state.lock().rejected_baud_rates.contains(&baud_rate) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("baud rate {baud_rate} not supported by adapter"),
            )));
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let reply = {
            let mut state = self.bus.state.lock();
            if let Some(owner) = state.in_flight.filter(|owner| *owner != self.handle) {
                state.collisions += 1;
                warn!(handle = self.handle, owner, "mock bus: collision with in-flight exchange");
                return Err(TransportError::Io(std::io::Error::other(
                    "bus collision: another exchange is in flight",
                )));
            }
            state.log.push(WireEvent::Tx {
                handle: self.handle,
                bytes: bytes.to_vec(),
            });
            let reply = state.process(self.baud_rate, bytes);
            if !reply.is_empty() {
                state.in_flight = Some(self.handle);
            } else if self.rx.is_empty() {
                state.release(self.handle);
            }
            reply
        };
        trace!(handle = self.handle, "mock tx {:02X?} -> {} reply bytes", bytes, reply.len());
        self.rx.extend(reply);
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        if self.rx.len() < n {
            // 应答是同步生成的，不足就不会再有
            std::thread::sleep(timeout.min(IDLE_WAIT));
            self.rx.clear();
            self.release_if_drained();
            return Err(TransportError::Timeout);
        }
        Ok(self.deliver(n))
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        if self.rx.is_empty() {
            std::thread::sleep(timeout.min(IDLE_WAIT));
            return Ok(Vec::new());
        }
        Ok(self.deliver(self.rx.len()))
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.rx.clear();
        self.release_if_drained();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.rx.clear();
        self.release_if_drained();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servobus_protocol::{BROADCAST_ID, FrameScanner, decode_status};

    const BAUD: u32 = 1_000_000;
    const TIMEOUT: Duration = Duration::from_millis(10);

    fn read_reply(port: &mut MockTransport) -> StatusPacket {
        let bytes = port.read_available(TIMEOUT).unwrap();
        decode_status(&bytes).unwrap()
    }

    #[test]
    fn test_ping_reply() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(3, 777, BAUD));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::ping(3).unwrap().encode()).unwrap();
        let status = read_reply(&mut port);
        assert_eq!(status.id, 3);
        assert!(status.error.is_ok());
        assert!(status.params.is_empty());
    }

    #[test]
    fn test_wrong_baud_is_silent() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD));
        let mut port = bus.open("sim", 115_200);
        port.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        assert!(port.read_available(TIMEOUT).unwrap().is_empty());
        assert!(matches!(port.read_exact(6, TIMEOUT), Err(TransportError::Timeout)));
    }

    #[test]
    fn test_broadcast_ping_back_to_back() {
        let bus = SimulatedBus::new()
            .with_servo(SimulatedServo::new(1, 777, BAUD))
            .with_servo(SimulatedServo::new(2, 777, BAUD))
            .with_servo(SimulatedServo::new(3, 777, 57_600));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::ping(BROADCAST_ID).unwrap().encode()).unwrap();

        let mut scanner = FrameScanner::new();
        scanner.extend(&port.read_available(TIMEOUT).unwrap());
        let ids: Vec<u8> = std::iter::from_fn(|| scanner.next_frame())
            .map(|f| f.unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_read_memory_little_endian() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD).with_position(2048));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::read(1, 56, 2).unwrap().encode()).unwrap();
        assert_eq!(read_reply(&mut port).params, vec![0x00, 0x08]);

        port.write_all(&Packet::read(1, 3, 2).unwrap().encode()).unwrap();
        assert_eq!(read_reply(&mut port).params, 777u16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_big_endian_servo() {
        let servo = SimulatedServo::new(1, 1284, BAUD)
            .with_byte_order(ByteOrder::BigEndian)
            .with_position(512);
        let bus = SimulatedBus::new().with_servo(servo);
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::read(1, 3, 2).unwrap().encode()).unwrap();
        assert_eq!(read_reply(&mut port).params, 1284u16.to_be_bytes().to_vec());
        assert_eq!(bus.memory(1, 56, 2), Some(vec![0x02, 0x00]));
    }

    #[test]
    fn test_write_then_read() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::write(1, 31, &[0x64, 0x08]).unwrap().encode()).unwrap();
        assert!(read_reply(&mut port).error.is_ok());
        assert_eq!(bus.memory(1, 31, 2), Some(vec![0x64, 0x08]));
    }

    #[test]
    fn test_sync_write_has_no_reply() {
        let bus = SimulatedBus::new()
            .with_servo(SimulatedServo::new(1, 777, BAUD))
            .with_servo(SimulatedServo::new(2, 777, BAUD));
        let mut port = bus.open("sim", BAUD);
        let packet = Packet::sync_write(42, 2, &[(1, vec![0x00, 0x04]), (2, vec![0x00, 0x0C])]).unwrap();
        port.write_all(&packet.encode()).unwrap();
        assert!(port.read_available(TIMEOUT).unwrap().is_empty());
        assert_eq!(bus.memory(1, 42, 2), Some(vec![0x00, 0x04]));
        assert_eq!(bus.memory(2, 42, 2), Some(vec![0x00, 0x0C]));
    }

    #[test]
    fn test_read_out_of_memory_is_silent() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::read(1, 255, 2).unwrap().encode()).unwrap();
        assert!(port.read_available(TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn test_fault_injection() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD).with_fault(Fault::CorruptChecksum));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        let bytes = port.read_available(TIMEOUT).unwrap();
        assert!(decode_status(&bytes).is_err());

        bus.set_fault(1, Some(Fault::GarbagePrefix(vec![0x00, 0x42])));
        port.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        let bytes = port.read_available(TIMEOUT).unwrap();
        assert_eq!(&bytes[..2], &[0x00, 0x42]);
        assert!(decode_status(&bytes[2..]).is_ok());

        bus.set_fault(1, Some(Fault::Silent));
        port.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        assert!(port.read_available(TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn test_error_flags_in_reply() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD).with_error_flags(0x20));
        let mut port = bus.open("sim", BAUD);
        port.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        assert_eq!(read_reply(&mut port).error, StatusFlags(0x20));
    }

    #[test]
    fn test_rejected_baud_rate() {
        let bus = SimulatedBus::new();
        let mut port = bus.open("sim", BAUD);
        bus.reject_baud_rate(4_800);
        assert!(matches!(port.set_baud_rate(4_800), Err(TransportError::Io(_))));
        assert_eq!(port.baud_rate(), BAUD);
        port.set_baud_rate(9_600).unwrap();
        assert_eq!(port.baud_rate(), 9_600);
    }

    #[test]
    fn test_collision_detected() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD));
        let mut a = bus.open("sim", BAUD);
        let mut b = bus.open("sim", BAUD);

        a.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        // a 的应答尚未读取
        assert!(matches!(b.write_all(&Packet::ping(1).unwrap().encode()), Err(TransportError::Io(_))));
        assert_eq!(bus.collisions(), 1);

        a.read_exact(6, TIMEOUT).unwrap();
        b.write_all(&Packet::ping(1).unwrap().encode()).unwrap();
        assert_eq!(bus.collisions(), 1);
    }

    #[test]
    fn test_wire_log() {
        let bus = SimulatedBus::new().with_servo(SimulatedServo::new(1, 777, BAUD));
        let mut port = bus.open("sim", BAUD);
        let request = Packet::ping(1).unwrap().encode();
        port.write_all(&request).unwrap();

        // 应答在主机读取时才记录
        assert_eq!(bus.wire_log().len(), 1);
        port.read_exact(6, TIMEOUT).unwrap();

        // 清空丢弃的应答不记录
        port.write_all(&request).unwrap();
        port.clear_input().unwrap();

        let log = bus.wire_log();
        assert_eq!(log.len(), 3);
        assert_eq!(
            log[0],
            WireEvent::Tx {
                handle: port.handle(),
                bytes: request.clone()
            }
        );
        assert!(matches!(&log[1], WireEvent::Rx { bytes, .. } if bytes.len() == 6));
        assert_eq!(
            log[2],
            WireEvent::Tx {
                handle: port.handle(),
                bytes: request
            }
        );

        bus.clear_wire_log();
        assert!(bus.wire_log().is_empty());
    }

    #[test]
    fn test_closed_handle() {
        let bus = SimulatedBus::new();
        let mut port = bus.open("sim", BAUD);
        port.close();
        assert!(!port.is_open());
        assert!(matches!(port.write_all(&[0x00]), Err(TransportError::Closed)));
        assert!(matches!(port.read_available(TIMEOUT), Err(TransportError::Closed)));
        assert!(matches!(port.set_baud_rate(9600), Err(TransportError::Closed)));
    }
}
