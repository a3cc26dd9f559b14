//! 帧编解码
//!
//! 线路格式：
//!
//! ```text
//! [0xFF 0xFF][id][length][instruction|error][params...][checksum]
//!
//! length   = params.len() + 2
//! checksum = !(id + length + instruction + Σparams) & 0xFF
//! ```
//!
//! 主机发出的是指令帧（[`Packet`]），舵机应答的是状态帧（[`StatusPacket`]），
//! 两者结构相同，只是第 5 个字节的含义不同（指令码 / 错误位）。
//!
//! 共享总线上多个设备的应答可能首尾相接地到达，[`FrameScanner`] 负责从
//! 字节流中逐帧切分，遇到损坏的候选帧时只丢弃一个字节并继续寻找下一个帧头。

use crate::FrameError;
use crate::constants::*;
use bytes::{Buf, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    /// 异步写（等待 Action 触发）
    RegWrite = 0x04,
    Action = 0x05,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// 计算校验和：对 `id..params` 求和取反，截断为一个字节
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 按线路格式拼装一帧
fn encode_frame(id: u8, code: u8, params: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + params.len());
    frame.extend_from_slice(&HEADER);
    frame.push(id);
    frame.push((params.len() + 2) as u8);
    frame.push(code);
    frame.extend_from_slice(params);
    frame.push(checksum(&frame[idx::ID..]));
    frame
}

fn check_params(id: u8, params: &[u8]) -> Result<(), FrameError> {
    if id == 0xFF {
        return Err(FrameError::Malformed("id 0xFF collides with header".to_string()));
    }
    if params.len() > MAX_PARAMS_LEN {
        return Err(FrameError::Malformed(format!(
            "{} parameter bytes exceed limit of {}",
            params.len(),
            MAX_PARAMS_LEN
        )));
    }
    Ok(())
}

/// 指令帧
///
/// 字段私有，只能通过校验过的构造器创建，因此任何 `Packet` 都可以无损编码。
///
/// # 示例
///
/// ```rust
/// use servobus_protocol::{Packet, decode};
///
/// let ping = Packet::ping(1)?;
/// assert_eq!(ping.encode(), vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
/// assert_eq!(decode(&ping.encode())?, ping);
/// # Ok::<(), servobus_protocol::FrameError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: u8,
    instruction: Instruction,
    params: Vec<u8>,
}

impl Packet {
    /// 通用构造器
    ///
    /// # 错误
    /// - `FrameError::Malformed`: id 为 0xFF，或参数超过单帧上限
    pub fn new(id: u8, instruction: Instruction, params: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let params = params.into();
        check_params(id, &params)?;
        Ok(Self {
            id,
            instruction,
            params,
        })
    }

    /// Ping（`BROADCAST_ID` 为广播 Ping）
    pub fn ping(id: u8) -> Result<Self, FrameError> {
        Self::new(id, Instruction::Ping, Vec::new())
    }

    /// 从 `address` 开始读取 `length` 字节
    pub fn read(id: u8, address: u8, length: u8) -> Result<Self, FrameError> {
        Self::new(id, Instruction::Read, vec![address, length])
    }

    /// 从 `address` 开始写入 `data`
    pub fn write(id: u8, address: u8, data: &[u8]) -> Result<Self, FrameError> {
        let mut params = Vec::with_capacity(1 + data.len());
        params.push(address);
        params.extend_from_slice(data);
        Self::new(id, Instruction::Write, params)
    }

    /// 同步写：一帧写多个设备的同一段寄存器（无应答）
    ///
    /// 每个条目的数据长度必须等于 `data_len`。
    pub fn sync_write(address: u8, data_len: u8, entries: &[(u8, Vec<u8>)]) -> Result<Self, FrameError> {
        let mut params = Vec::with_capacity(2 + entries.len() * (1 + data_len as usize));
        params.push(address);
        params.push(data_len);
        for (id, data) in entries {
            if data.len() != data_len as usize {
                return Err(FrameError::Malformed(format!(
                    "sync write entry for id {} has {} bytes, expected {}",
                    id,
                    data.len(),
                    data_len
                )));
            }
            params.push(*id);
            params.extend_from_slice(data);
        }
        Self::new(BROADCAST_ID, Instruction::SyncWrite, params)
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn instruction(&self) -> Instruction {
        self.instruction
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn is_broadcast(&self) -> bool {
        self.id == BROADCAST_ID
    }

    /// 编码为线路字节
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.id, self.instruction.into(), &self.params)
    }
}

/// 状态帧错误位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    const NAMES: [(u8, &'static str); 5] = [
        (ERRBIT_VOLTAGE, "voltage"),
        (ERRBIT_ANGLE, "angle"),
        (ERRBIT_OVERHEAT, "overheat"),
        (ERRBIT_OVERELE, "overcurrent"),
        (ERRBIT_OVERLOAD, "overload"),
    ];

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// 已置位的错误名称
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "ok");
        }
        let names = self.names();
        if names.is_empty() {
            write!(f, "0x{:02X}", self.0)
        } else {
            write!(f, "{} (0x{:02X})", names.join("|"), self.0)
        }
    }
}

/// 状态帧（设备应答）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: StatusFlags,
    pub params: Vec<u8>,
}

impl StatusPacket {
    pub fn new(id: u8, error: StatusFlags, params: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let params = params.into();
        check_params(id, &params)?;
        Ok(Self { id, error, params })
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.id, self.error.0, &self.params)
    }
}

/// 已通过帧头/长度/校验和检查、尚未解释第 5 字节的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub id: u8,
    pub code: u8,
    pub params: Vec<u8>,
}

impl RawFrame {
    /// 解释为指令帧
    pub fn into_packet(self) -> Result<Packet, FrameError> {
        let instruction = Instruction::try_from(self.code)
            .map_err(|_| FrameError::Malformed(format!("unknown instruction 0x{:02X}", self.code)))?;
        Packet::new(self.id, instruction, self.params)
    }

    /// 解释为状态帧
    pub fn into_status(self) -> StatusPacket {
        StatusPacket {
            id: self.id,
            error: StatusFlags(self.code),
            params: self.params,
        }
    }
}

enum Parse {
    Complete(RawFrame, usize),
    Incomplete,
}

/// 从缓冲区起始位置解析一帧
fn parse_at_start(buf: &[u8]) -> Result<Parse, FrameError> {
    let header_len = buf.len().min(HEADER.len());
    if buf[..header_len] != HEADER[..header_len] {
        return Err(FrameError::Malformed("missing header magic".to_string()));
    }
    if buf.len() <= idx::LENGTH {
        return Ok(Parse::Incomplete);
    }

    let id = buf[idx::ID];
    if id == 0xFF {
        return Err(FrameError::Malformed("invalid id 0xFF".to_string()));
    }

    let length = buf[idx::LENGTH] as usize;
    if length < 2 || length + 4 > MAX_PACKET_LEN {
        return Err(FrameError::Malformed(format!("invalid length field {}", length)));
    }

    let total = length + 4;
    if buf.len() < total {
        return Ok(Parse::Incomplete);
    }

    let expected = checksum(&buf[idx::ID..total - 1]);
    let actual = buf[total - 1];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    Ok(Parse::Complete(
        RawFrame {
            id,
            code: buf[idx::INSTRUCTION],
            params: buf[idx::PARAM_0..total - 1].to_vec(),
        },
        total,
    ))
}

/// 严格解析：`bytes` 必须恰好是一帧
fn decode_raw(bytes: &[u8]) -> Result<RawFrame, FrameError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FrameError::Malformed(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }
    match parse_at_start(bytes)? {
        Parse::Incomplete => Err(FrameError::Malformed(format!(
            "truncated frame: {} bytes, length field says {}",
            bytes.len(),
            bytes[idx::LENGTH] as usize + 4
        ))),
        Parse::Complete(_, consumed) if consumed != bytes.len() => Err(FrameError::Malformed(
            format!("{} trailing bytes after frame", bytes.len() - consumed),
        )),
        Parse::Complete(frame, _) => Ok(frame),
    }
}

/// 解码一帧指令帧
///
/// # 错误
/// - `FrameError::Malformed`: 长度不足、帧头错误、长度字段与缓冲区不符、未知指令
/// - `FrameError::ChecksumMismatch`: 校验和错误
pub fn decode(bytes: &[u8]) -> Result<Packet, FrameError> {
    decode_raw(bytes)?.into_packet()
}

/// 解码一帧状态帧
pub fn decode_status(bytes: &[u8]) -> Result<StatusPacket, FrameError> {
    Ok(decode_raw(bytes)?.into_status())
}

/// 字节流分帧器（带重同步）
///
/// # 示例
///
/// ```rust
/// use servobus_protocol::{FrameScanner, StatusFlags, StatusPacket};
///
/// let a = StatusPacket::new(1, StatusFlags(0), vec![]).unwrap().encode();
/// let b = StatusPacket::new(2, StatusFlags(0), vec![]).unwrap().encode();
///
/// let mut scanner = FrameScanner::new();
/// scanner.extend(&[0x00, 0x13]); // 线路噪声
/// scanner.extend(&a);
/// scanner.extend(&b);
///
/// assert_eq!(scanner.next_frame().unwrap().unwrap().id, 1);
/// assert_eq!(scanner.next_frame().unwrap().unwrap().id, 2);
/// assert!(scanner.next_frame().is_none());
/// ```
#[derive(Debug, Default)]
pub struct FrameScanner {
    buf: BytesMut,
    discarded: usize,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加收到的字节
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 当前缓存的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 累计丢弃的字节数（噪声 + 重同步）
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.discarded += n;
    }

    /// 取出下一帧
    ///
    /// - `None`: 缓冲区中没有完整的帧（需要更多字节）
    /// - `Some(Ok(frame))`: 成功切分一帧
    /// - `Some(Err(e))`: 候选帧损坏，已丢弃一个字节，可以继续调用
    pub fn next_frame(&mut self) -> Option<Result<RawFrame, FrameError>> {
        loop {
            match self.buf.windows(2).position(|w| w == HEADER) {
                Some(0) => {},
                Some(pos) => self.discard(pos),
                None => {
                    // 末尾单个 0xFF 可能是下一个帧头的前半部分
                    let keep = usize::from(self.buf.last() == Some(&HEADER[0]));
                    let drop = self.buf.len() - keep;
                    self.discard(drop);
                    return None;
                },
            }

            // 0xFF 0xFF 0xFF：帧头向后滑动一个字节
            if self.buf.len() > idx::ID && self.buf[idx::ID] == 0xFF {
                self.discard(1);
                continue;
            }

            return match parse_at_start(&self.buf) {
                Ok(Parse::Incomplete) => None,
                Ok(Parse::Complete(frame, consumed)) => {
                    self.buf.advance(consumed);
                    Some(Ok(frame))
                },
                Err(e) => {
                    self.discard(1);
                    Some(Err(e))
                },
            };
        }
    }

    /// 字节流结束：把缓冲区里剩余的内容全部切分完
    ///
    /// 长度字段损坏的候选帧会一直等待更多字节，流结束时逐字节丢弃它们，
    /// 以便找到其后可能存在的完整帧。
    pub fn finish(&mut self) -> Vec<Result<RawFrame, FrameError>> {
        let mut out = Vec::new();
        loop {
            match self.next_frame() {
                Some(result) => out.push(result),
                None if self.buf.is_empty() => break,
                None => {
                    let pending = self.buf.len();
                    self.discard(1);
                    if pending > 1 {
                        out.push(Err(FrameError::Malformed(format!(
                            "incomplete frame at end of stream ({} bytes)",
                            pending
                        ))));
                    }
                },
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vectors() {
        // Ping id 1
        assert_eq!(checksum(&[0x01, 0x02, 0x01]), 0xFB);
        // Read id 1, PresentPosition (56), 2 bytes
        assert_eq!(checksum(&[0x01, 0x04, 0x02, 0x38, 0x02]), 0xBE);
    }

    #[test]
    fn test_encode_ping() {
        assert_eq!(
            Packet::ping(1).unwrap().encode(),
            vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]
        );
        assert_eq!(
            Packet::ping(BROADCAST_ID).unwrap().encode(),
            vec![0xFF, 0xFF, 0xFE, 0x02, 0x01, 0xFE]
        );
    }

    #[test]
    fn test_encode_read() {
        assert_eq!(
            Packet::read(1, 56, 2).unwrap().encode(),
            vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x38, 0x02, 0xBE]
        );
    }

    #[test]
    fn test_encode_write() {
        let packet = Packet::write(2, 31, &[0x00, 0x08]).unwrap();
        let bytes = packet.encode();
        assert_eq!(&bytes[..5], &[0xFF, 0xFF, 0x02, 0x05, 0x03]);
        assert_eq!(&bytes[5..8], &[31, 0x00, 0x08]);
        assert_eq!(bytes[8], checksum(&bytes[2..8]));
    }

    #[test]
    fn test_packet_rejects_oversized_params() {
        let params = vec![0u8; MAX_PARAMS_LEN + 1];
        assert!(matches!(
            Packet::new(1, Instruction::Write, params),
            Err(FrameError::Malformed(_))
        ));
        assert!(Packet::new(1, Instruction::Write, vec![0u8; MAX_PARAMS_LEN]).is_ok());
    }

    #[test]
    fn test_packet_rejects_id_ff() {
        assert!(Packet::new(0xFF, Instruction::Ping, vec![]).is_err());
        assert!(matches!(Packet::ping(0xFF), Err(FrameError::Malformed(_))));
        assert!(matches!(Packet::read(0xFF, 56, 2), Err(FrameError::Malformed(_))));
        assert!(Packet::write(0xFF, 42, &[0x00, 0x08]).is_err());
    }

    #[test]
    fn test_shortcut_constructors_roundtrip() {
        for id in [0, 1, MAX_ID, BROADCAST_ID] {
            let ping = Packet::ping(id).unwrap();
            assert_eq!(decode(&ping.encode()).unwrap(), ping);
            let read = Packet::read(id, 56, 2).unwrap();
            assert_eq!(decode(&read.encode()).unwrap(), read);
        }
    }

    #[test]
    fn test_sync_write_layout() {
        let packet = Packet::sync_write(42, 2, &[(1, vec![0x00, 0x08]), (2, vec![0xFF, 0x07])]).unwrap();
        assert!(packet.is_broadcast());
        assert_eq!(packet.instruction(), Instruction::SyncWrite);
        assert_eq!(packet.params(), &[42, 2, 1, 0x00, 0x08, 2, 0xFF, 0x07]);
    }

    #[test]
    fn test_sync_write_rejects_wrong_entry_len() {
        assert!(Packet::sync_write(42, 2, &[(1, vec![0x00])]).is_err());
    }

    #[test]
    fn test_decode_roundtrip() {
        let packet = Packet::read(7, 3, 2).unwrap();
        assert_eq!(decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            decode(&[0xFF, 0xFF, 0x01]),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_bad_header() {
        let mut bytes = Packet::ping(1).unwrap().encode();
        bytes[1] = 0xFE;
        assert!(matches!(decode(&bytes), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut bytes = Packet::ping(1).unwrap().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(
            decode(&bytes),
            Err(FrameError::ChecksumMismatch {
                expected: 0xFB,
                actual: 0xFA
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = Packet::ping(1).unwrap().encode();
        bytes.push(0x00);
        assert!(matches!(decode(&bytes), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_decode_unknown_instruction() {
        let bytes = encode_frame(1, 0x42, &[]);
        assert!(matches!(decode(&bytes), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_decode_status() {
        let status = StatusPacket::new(3, StatusFlags(ERRBIT_OVERLOAD), vec![0x00, 0x08]).unwrap();
        let decoded = decode_status(&status.encode()).unwrap();
        assert_eq!(decoded, status);
        assert!(!decoded.error.is_ok());
        assert_eq!(decoded.error.names(), vec!["overload"]);
    }

    #[test]
    fn test_status_flags_display() {
        assert_eq!(StatusFlags(0).to_string(), "ok");
        assert_eq!(
            StatusFlags(ERRBIT_VOLTAGE | ERRBIT_OVERHEAT).to_string(),
            "voltage|overheat (0x05)"
        );
        assert_eq!(StatusFlags(0x40).to_string(), "0x40");
    }

    #[test]
    fn test_scanner_back_to_back_frames() {
        let mut scanner = FrameScanner::new();
        for id in 1..=6 {
            scanner.extend(&StatusPacket::new(id, StatusFlags(0), vec![]).unwrap().encode());
        }
        let ids: Vec<u8> = std::iter::from_fn(|| scanner.next_frame())
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_scanner_partial_frame_waits() {
        let bytes = StatusPacket::new(1, StatusFlags(0), vec![0x10, 0x20]).unwrap().encode();
        let mut scanner = FrameScanner::new();
        scanner.extend(&bytes[..4]);
        assert!(scanner.next_frame().is_none());
        scanner.extend(&bytes[4..]);
        let frame = scanner.next_frame().unwrap().unwrap();
        assert_eq!(frame.params, vec![0x10, 0x20]);
    }

    #[test]
    fn test_scanner_skips_leading_garbage() {
        let mut scanner = FrameScanner::new();
        scanner.extend(&[0x12, 0x34, 0xFF]);
        scanner.extend(&StatusPacket::new(4, StatusFlags(0), vec![]).unwrap().encode());
        assert_eq!(scanner.next_frame().unwrap().unwrap().id, 4);
        assert_eq!(scanner.discarded(), 3);
    }

    #[test]
    fn test_scanner_triple_ff_prefix() {
        let mut scanner = FrameScanner::new();
        scanner.extend(&[0xFF]);
        scanner.extend(&StatusPacket::new(9, StatusFlags(0), vec![]).unwrap().encode());
        assert_eq!(scanner.next_frame().unwrap().unwrap().id, 9);
    }

    #[test]
    fn test_scanner_resyncs_after_corrupt_frame() {
        let mut corrupt = StatusPacket::new(1, StatusFlags(0), vec![0xAA]).unwrap().encode();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = StatusPacket::new(2, StatusFlags(0), vec![0xBB]).unwrap().encode();

        let mut scanner = FrameScanner::new();
        scanner.extend(&corrupt);
        scanner.extend(&good);

        assert!(matches!(
            scanner.next_frame(),
            Some(Err(FrameError::ChecksumMismatch { .. }))
        ));
        let frame = scanner.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, 2);
        assert_eq!(frame.params, vec![0xBB]);
    }

    #[test]
    fn test_scanner_finish_drains_bogus_length() {
        // 长度字段被破坏成很大的值，后面跟着一帧完整的应答
        let mut scanner = FrameScanner::new();
        scanner.extend(&[0xFF, 0xFF, 0x01, 0xC8, 0x00]);
        scanner.extend(&StatusPacket::new(3, StatusFlags(0), vec![]).unwrap().encode());
        assert!(scanner.next_frame().is_none());

        let rest = scanner.finish();
        let ids: Vec<u8> = rest.into_iter().filter_map(Result::ok).map(|f| f.id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(scanner.buffered(), 0);
    }
}
