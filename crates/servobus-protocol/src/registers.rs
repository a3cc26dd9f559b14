//! 寄存器表
//!
//! 按 `(型号, 寄存器名)` 索引。同一个逻辑寄存器在不同系列中可能位于不同地址
//! （例如 `Lock` 在 STS 系列是 55，在 SCS 系列是 48），也可能根本不存在
//! （SCS 系列没有 `HomingOffset`）。
//!
//! 带符号寄存器使用符号-幅值编码：`sign_bit` 指示符号位所在的 bit，
//! 其余低位为绝对值。例如 `HomingOffset` 的符号位是 bit 11，取值范围 ±2047。

use crate::{ByteOrder, FrameError, ProtocolVersion, RegisterError};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// 舵机型号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ModelTag {
    Sts3215,
    Sts3250,
    Sm8512bl,
    Scs0009,
}

/// 产品系列（决定寄存器表和协议版本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    Sts,
    Sms,
    Scs,
}

impl Series {
    pub fn protocol(self) -> ProtocolVersion {
        match self {
            Series::Sts | Series::Sms => ProtocolVersion::V0,
            Series::Scs => ProtocolVersion::V1,
        }
    }

    /// 该系列的控制表
    pub fn registers(self) -> &'static [RegisterDescriptor] {
        match self {
            Series::Sts | Series::Sms => STS_SMS_REGISTERS,
            Series::Scs => SCS_REGISTERS,
        }
    }
}

impl ModelTag {
    pub const ALL: [ModelTag; 4] = [
        ModelTag::Sts3215,
        ModelTag::Sts3250,
        ModelTag::Sm8512bl,
        ModelTag::Scs0009,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelTag::Sts3215 => "sts3215",
            ModelTag::Sts3250 => "sts3250",
            ModelTag::Sm8512bl => "sm8512bl",
            ModelTag::Scs0009 => "scs0009",
        }
    }

    /// `ModelNumber` 寄存器中的型号编号
    pub fn model_number(self) -> u16 {
        match self {
            ModelTag::Sts3215 => 777,
            ModelTag::Sts3250 => 2825,
            ModelTag::Sm8512bl => 11272,
            ModelTag::Scs0009 => 1284,
        }
    }

    pub fn from_model_number(number: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.model_number() == number)
    }

    pub fn series(self) -> Series {
        match self {
            ModelTag::Sts3215 | ModelTag::Sts3250 => Series::Sts,
            ModelTag::Sm8512bl => Series::Sms,
            ModelTag::Scs0009 => Series::Scs,
        }
    }

    /// 编码器一圈的刻度数
    pub fn ticks_per_revolution(self) -> NonZeroU32 {
        match self.series() {
            Series::Sts | Series::Sms => crate::calibration::TICKS_PER_REVOLUTION,
            Series::Scs => SCS_TICKS_PER_REVOLUTION,
        }
    }

    pub fn protocol(self) -> ProtocolVersion {
        self.series().protocol()
    }
}

const SCS_TICKS_PER_REVOLUTION: NonZeroU32 = match NonZeroU32::new(1024) {
    Some(v) => v,
    None => unreachable!(),
};

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelTag {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RegisterError::UnknownModel(s.to_string()))
    }
}

/// 寄存器宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterWidth {
    Byte = 1,
    Word = 2,
    DWord = 4,
}

impl RegisterWidth {
    pub fn bytes(self) -> usize {
        self as usize
    }

    fn bits(self) -> u32 {
        self as u32 * 8
    }
}

/// 访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// 寄存器描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub address: u16,
    pub width: RegisterWidth,
    pub signed: bool,
    /// 符号-幅值编码的符号位；`None` 且 `signed` 时为补码
    pub sign_bit: Option<u8>,
    pub access: Access,
}

/// 解码后、尚未校准的寄存器值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReading {
    pub value: i32,
    pub width: RegisterWidth,
}

const POSITION_REGISTERS: [&str; 4] = [
    "PresentPosition",
    "GoalPosition",
    "MinPositionLimit",
    "MaxPositionLimit",
];

impl RegisterDescriptor {
    const fn ro(name: &'static str, address: u16, width: RegisterWidth) -> Self {
        Self {
            name,
            address,
            width,
            signed: false,
            sign_bit: None,
            access: Access::ReadOnly,
        }
    }

    const fn rw(name: &'static str, address: u16, width: RegisterWidth) -> Self {
        Self {
            name,
            address,
            width,
            signed: false,
            sign_bit: None,
            access: Access::ReadWrite,
        }
    }

    const fn sign_magnitude(mut self, sign_bit: u8) -> Self {
        self.signed = true;
        self.sign_bit = Some(sign_bit);
        self
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// 编码器位置类寄存器（归一化只作用于这些寄存器）
    pub fn is_position(&self) -> bool {
        POSITION_REGISTERS.contains(&self.name)
    }

    /// 指令帧中的单字节地址
    pub fn wire_address(&self) -> Result<u8, FrameError> {
        u8::try_from(self.address).map_err(|_| {
            FrameError::Malformed(format!(
                "register {} address {} does not fit a one-byte address",
                self.name, self.address
            ))
        })
    }

    /// 可写入的取值范围 `[min, max]`
    pub fn value_range(&self) -> (i64, i64) {
        let bits = self.width.bits();
        match (self.signed, self.sign_bit) {
            (true, Some(bit)) => {
                let max = (1i64 << bit) - 1;
                (-max, max)
            },
            (true, None) => (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1),
            // RawReading 以 i32 承载，4 字节无符号寄存器上限为 i32::MAX
            (false, _) => (0, ((1i64 << bits) - 1).min(i64::from(i32::MAX))),
        }
    }

    /// 编码寄存器值
    ///
    /// # 错误
    /// - `RegisterError::ValueOutOfRange`: 值超出宽度/符号允许的范围（不做截断）
    pub fn encode(&self, value: i64, order: ByteOrder) -> Result<Vec<u8>, RegisterError> {
        let (min, max) = self.value_range();
        if value < min || value > max {
            return Err(RegisterError::ValueOutOfRange {
                register: self.name,
                value,
                min,
                max,
            });
        }

        let raw = match self.sign_bit {
            Some(bit) if value < 0 => (1u32 << bit) | value.unsigned_abs() as u32,
            // 补码：截取低 `bits` 位
            _ => (value as u32) & mask(self.width),
        };
        Ok(order.write_uint(raw, self.width.bytes()))
    }

    /// 解码寄存器值
    ///
    /// # 错误
    /// - `FrameError::Malformed`: 字节数与寄存器宽度不符，或值无法用 i32 表示
    pub fn decode(&self, bytes: &[u8], order: ByteOrder) -> Result<RawReading, FrameError> {
        if bytes.len() != self.width.bytes() {
            return Err(FrameError::Malformed(format!(
                "register {} expects {} bytes, got {}",
                self.name,
                self.width.bytes(),
                bytes.len()
            )));
        }

        let raw = order.read_uint(bytes);
        let value = match (self.signed, self.sign_bit) {
            (true, Some(bit)) => {
                let magnitude = i64::from(raw & ((1u32 << bit) - 1));
                if raw & (1u32 << bit) != 0 { -magnitude } else { magnitude }
            },
            (true, None) => {
                let shift = 32 - self.width.bits();
                i64::from(((raw << shift) as i32) >> shift)
            },
            (false, _) => i64::from(raw),
        };

        let value = i32::try_from(value).map_err(|_| {
            FrameError::Malformed(format!("register {} value {} exceeds i32", self.name, value))
        })?;
        Ok(RawReading {
            value,
            width: self.width,
        })
    }
}

fn mask(width: RegisterWidth) -> u32 {
    match width {
        RegisterWidth::DWord => u32::MAX,
        w => (1u32 << w.bits()) - 1,
    }
}

use RegisterDescriptor as R;
use RegisterWidth::{Byte, Word};

/// STS/SMS 系列控制表（协议 0）
pub static STS_SMS_REGISTERS: &[RegisterDescriptor] = &[
    // EPROM
    R::ro("FirmwareMajorVersion", 0, Byte),
    R::ro("FirmwareMinorVersion", 1, Byte),
    R::ro("ModelNumber", 3, Word),
    R::rw("Id", 5, Byte),
    R::rw("BaudRate", 6, Byte),
    R::rw("ReturnDelayTime", 7, Byte),
    R::rw("ResponseStatusLevel", 8, Byte),
    R::rw("MinPositionLimit", 9, Word),
    R::rw("MaxPositionLimit", 11, Word),
    R::rw("MaxTemperatureLimit", 13, Byte),
    R::rw("MaxVoltageLimit", 14, Byte),
    R::rw("MinVoltageLimit", 15, Byte),
    R::rw("MaxTorqueLimit", 16, Word),
    R::rw("Phase", 18, Byte),
    R::rw("UnloadingCondition", 19, Byte),
    R::rw("LedAlarmCondition", 20, Byte),
    R::rw("PCoefficient", 21, Byte),
    R::rw("DCoefficient", 22, Byte),
    R::rw("ICoefficient", 23, Byte),
    R::rw("MinimumStartupForce", 24, Word),
    R::rw("CwDeadZone", 26, Byte),
    R::rw("CcwDeadZone", 27, Byte),
    R::rw("ProtectionCurrent", 28, Word),
    R::rw("AngularResolution", 30, Byte),
    R::rw("HomingOffset", 31, Word).sign_magnitude(11),
    R::rw("OperatingMode", 33, Byte),
    R::rw("ProtectiveTorque", 34, Byte),
    R::rw("ProtectionTime", 35, Byte),
    R::rw("OverloadTorque", 36, Byte),
    // SRAM
    R::rw("TorqueEnable", 40, Byte),
    R::rw("Acceleration", 41, Byte),
    R::rw("GoalPosition", 42, Word),
    R::rw("GoalTime", 44, Word),
    R::rw("GoalVelocity", 46, Word).sign_magnitude(15),
    R::rw("TorqueLimit", 48, Word),
    R::rw("Lock", 55, Byte),
    R::ro("PresentPosition", 56, Word),
    R::ro("PresentVelocity", 58, Word).sign_magnitude(15),
    R::ro("PresentLoad", 60, Word),
    R::ro("PresentVoltage", 62, Byte),
    R::ro("PresentTemperature", 63, Byte),
    R::ro("Status", 65, Byte),
    R::ro("Moving", 66, Byte),
    R::ro("PresentCurrent", 69, Word),
];

/// SCS 系列控制表（协议 1，无 `HomingOffset`）
pub static SCS_REGISTERS: &[RegisterDescriptor] = &[
    // EPROM
    R::ro("FirmwareMajorVersion", 0, Byte),
    R::ro("FirmwareMinorVersion", 1, Byte),
    R::ro("ModelNumber", 3, Word),
    R::rw("Id", 5, Byte),
    R::rw("BaudRate", 6, Byte),
    R::rw("ReturnDelayTime", 7, Byte),
    R::rw("ResponseStatusLevel", 8, Byte),
    R::rw("MinPositionLimit", 9, Word),
    R::rw("MaxPositionLimit", 11, Word),
    R::rw("MaxTemperatureLimit", 13, Byte),
    R::rw("MaxVoltageLimit", 14, Byte),
    R::rw("MinVoltageLimit", 15, Byte),
    R::rw("MaxTorqueLimit", 16, Word),
    R::rw("Phase", 18, Byte),
    R::rw("UnloadingCondition", 19, Byte),
    R::rw("LedAlarmCondition", 20, Byte),
    R::rw("PCoefficient", 21, Byte),
    R::rw("DCoefficient", 22, Byte),
    R::rw("ICoefficient", 23, Byte),
    R::rw("MinimumStartupForce", 24, Word),
    R::rw("CwDeadZone", 26, Byte),
    R::rw("CcwDeadZone", 27, Byte),
    R::rw("ProtectiveTorque", 37, Byte),
    R::rw("ProtectionTime", 38, Byte),
    // SRAM
    R::rw("TorqueEnable", 40, Byte),
    R::rw("Acceleration", 41, Byte),
    R::rw("GoalPosition", 42, Word),
    R::rw("RunningTime", 44, Word),
    R::rw("GoalVelocity", 46, Word),
    R::rw("Lock", 48, Byte),
    R::ro("PresentPosition", 56, Word),
    R::ro("PresentVelocity", 58, Word),
    R::ro("PresentLoad", 60, Word),
    R::ro("PresentVoltage", 62, Byte),
    R::ro("PresentTemperature", 63, Byte),
    R::ro("Status", 65, Byte),
    R::ro("Moving", 66, Byte),
];

/// 名称比较忽略大小写和下划线（`present_position` == `PresentPosition`）
fn name_matches(canonical: &str, query: &str) -> bool {
    let mut query = query.bytes().filter(|b| *b != b'_');
    let mut canonical = canonical.bytes();
    loop {
        match (canonical.next(), query.next()) {
            (None, None) => return true,
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(&b) => {},
            _ => return false,
        }
    }
}

/// 查找寄存器描述符
///
/// # 示例
///
/// ```rust
/// use servobus_protocol::{lookup, ModelTag};
///
/// let reg = lookup(ModelTag::Sts3215, "PresentPosition").unwrap();
/// assert_eq!(reg.address, 56);
/// assert!(lookup(ModelTag::Scs0009, "HomingOffset").is_err());
/// ```
///
/// # 错误
/// - `RegisterError::UnknownRegister`: 该型号没有此寄存器
pub fn lookup(model: ModelTag, name: &str) -> Result<&'static RegisterDescriptor, RegisterError> {
    model
        .series()
        .registers()
        .iter()
        .find(|r| name_matches(r.name, name))
        .ok_or_else(|| RegisterError::UnknownRegister {
            model,
            register: name.to_string(),
        })
}
