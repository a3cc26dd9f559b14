//! # Servobus Protocol
//!
//! Feetech STS/SMS/SCS 串行总线舵机协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（帧头、广播 ID、指令码、波特率表）
//! - `packet`: 指令帧/状态帧编解码，字节流重同步
//! - `registers`: 按 `(型号, 寄存器名)` 索引的寄存器表
//! - `calibration`: 编码器原始值到圈数/圈内位置/归零偏移的换算，以及归一化
//!
//! ## 字节序
//!
//! 帧结构本身与协议版本无关，多字节寄存器值的字节序由 [`ProtocolVersion`] 决定：
//! - 协议 0（STS/SMS 系列）：小端（低字节在前）
//! - 协议 1（SCS 系列）：大端（高字节在前）

pub mod calibration;
pub mod constants;
pub mod packet;
pub mod registers;

// 重新导出常用类型
pub use calibration::*;
pub use constants::*;
pub use packet::*;
pub use registers::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// 协议版本
///
/// 由调用方配置，不做自动协商。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProtocolVersion {
    /// STS/SMS 系列（小端）
    #[default]
    V0 = 0,
    /// SCS 系列（大端）
    V1 = 1,
}

impl ProtocolVersion {
    /// 多字节寄存器值的字节序
    pub fn byte_order(self) -> ByteOrder {
        match self {
            ProtocolVersion::V0 => ByteOrder::LittleEndian,
            ProtocolVersion::V1 => ByteOrder::BigEndian,
        }
    }

    /// 是否支持广播 Ping（SCS 系列固件不支持）
    pub fn supports_broadcast_ping(self) -> bool {
        matches!(self, ProtocolVersion::V0)
    }
}

/// 寄存器值字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// 将 `width` 字节的无符号值写为字节序列
    pub fn write_uint(self, value: u32, width: usize) -> Vec<u8> {
        let le = value.to_le_bytes();
        let mut out = le[..width].to_vec();
        if self == ByteOrder::BigEndian {
            out.reverse();
        }
        out
    }

    /// 从字节序列读出无符号值（最多 4 字节）
    pub fn read_uint(self, bytes: &[u8]) -> u32 {
        let fold = |acc: u32, b: &u8| (acc << 8) | u32::from(*b);
        match self {
            ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
            ByteOrder::BigEndian => bytes.iter().fold(0, fold),
        }
    }
}

/// 帧编解码错误
///
/// 均可通过丢弃一个字节重新同步字节流后恢复，核心层不会自动重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unexpected reply id: expected {expected}, got {actual}")]
    UnexpectedId { expected: u8, actual: u8 },
}

/// 寄存器表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Unknown register '{register}' for model {model}")]
    UnknownRegister { model: ModelTag, register: String },

    #[error("Unknown servo model '{0}'")]
    UnknownModel(String),

    #[error("Value {value} out of range for register '{register}' [{min}, {max}]")]
    ValueOutOfRange {
        register: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_from_u8() {
        assert_eq!(ProtocolVersion::try_from(0u8).unwrap(), ProtocolVersion::V0);
        assert_eq!(ProtocolVersion::try_from(1u8).unwrap(), ProtocolVersion::V1);
        assert!(ProtocolVersion::try_from(2u8).is_err());
        assert_eq!(u8::from(ProtocolVersion::V1), 1);
    }

    #[test]
    fn test_byte_order_per_protocol() {
        assert_eq!(ProtocolVersion::V0.byte_order(), ByteOrder::LittleEndian);
        assert_eq!(ProtocolVersion::V1.byte_order(), ByteOrder::BigEndian);
        assert!(ProtocolVersion::V0.supports_broadcast_ping());
        assert!(!ProtocolVersion::V1.supports_broadcast_ping());
    }

    #[test]
    fn test_write_uint_little_endian() {
        assert_eq!(ByteOrder::LittleEndian.write_uint(0x0800, 2), vec![0x00, 0x08]);
        assert_eq!(ByteOrder::LittleEndian.write_uint(0x7F, 1), vec![0x7F]);
        assert_eq!(
            ByteOrder::LittleEndian.write_uint(0x1234_5678, 4),
            vec![0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_write_uint_big_endian() {
        assert_eq!(ByteOrder::BigEndian.write_uint(0x0800, 2), vec![0x08, 0x00]);
        assert_eq!(
            ByteOrder::BigEndian.write_uint(0x1234_5678, 4),
            vec![0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_read_uint() {
        assert_eq!(ByteOrder::LittleEndian.read_uint(&[0x00, 0x08]), 0x0800);
        assert_eq!(ByteOrder::BigEndian.read_uint(&[0x00, 0x08]), 0x0008);
        assert_eq!(ByteOrder::LittleEndian.read_uint(&[0xFF]), 0xFF);
        assert_eq!(
            ByteOrder::BigEndian.read_uint(&[0x12, 0x34, 0x56, 0x78]),
            0x1234_5678
        );
    }

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::ChecksumMismatch {
            expected: 0xFB,
            actual: 0x00,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xFB, got 0x00"
        );

        let err = FrameError::UnexpectedId {
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("expected 1"));
    }
}
