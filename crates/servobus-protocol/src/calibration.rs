//! 位置校准与归一化
//!
//! 纯计算，无 I/O，无状态。
//!
//! 绝对编码器每圈 `ticks` 个刻度（STS/SMS 系列 4096）。原始读数被拆成
//! 圈数（向下取整）和圈内位置（欧几里得取模，始终落在 `[0, ticks)`），
//! 归零偏移以半圈（机械中点）为参考：
//!
//! ```text
//! full_turns    = floor(raw / ticks)
//! within_turn   = raw mod ticks
//! homing_offset = raw - ticks / 2
//! valid         = |homing_offset| <= ticks / 2 - 1
//! ```
//!
//! `HomingOffset` 寄存器只能表示 ±(ticks/2 - 1)，超出范围的偏移以
//! `valid = false` 报告，不做截断。

use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

/// STS/SMS 系列编码器分辨率
pub const TICKS_PER_REVOLUTION: NonZeroU32 = match NonZeroU32::new(4096) {
    Some(v) => v,
    None => unreachable!(),
};

/// 单次读数的校准结果（每次读取重新计算，不缓存）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionCalibration {
    pub raw: i32,
    pub ticks_per_revolution: u32,
    pub full_turns: i32,
    pub within_turn: u32,
    pub homing_offset: i32,
    pub valid: bool,
}

impl PositionCalibration {
    /// 有效时可写入 `HomingOffset` 的值
    pub fn writable_offset(&self) -> Option<i32> {
        self.valid.then_some(self.homing_offset)
    }
}

/// 以 4096 刻度/圈校准
///
/// # 示例
///
/// ```rust
/// use servobus_protocol::calibrate;
///
/// let cal = calibrate(4097);
/// assert_eq!(cal.full_turns, 1);
/// assert_eq!(cal.within_turn, 1);
/// assert_eq!(cal.homing_offset, 2049);
/// assert!(!cal.valid);
/// ```
pub fn calibrate(raw: i32) -> PositionCalibration {
    calibrate_with_resolution(raw, TICKS_PER_REVOLUTION)
}

/// 以任意分辨率校准
pub fn calibrate_with_resolution(raw: i32, ticks: NonZeroU32) -> PositionCalibration {
    let t = i64::from(ticks.get());
    let r = i64::from(raw);
    let half = t / 2;

    let offset = r - half;
    let clamped = offset.clamp(i64::from(i32::MIN), i64::from(i32::MAX));

    PositionCalibration {
        raw,
        ticks_per_revolution: ticks.get(),
        // |r / t| <= |r|，必然落在 i32 内
        full_turns: r.div_euclid(t) as i32,
        within_turn: r.rem_euclid(t) as u32,
        homing_offset: clamped as i32,
        valid: offset.abs() <= half - 1,
    }
}

/// 归一化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NormMode {
    /// 映射到 [0, 100]
    #[cfg_attr(feature = "serde", serde(rename = "RANGE_0_100"))]
    Range0To100,
    /// 映射到 [-100, 100]
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "RANGE_M100_100"))]
    RangeM100To100,
    /// 原始刻度值
    #[cfg_attr(feature = "serde", serde(rename = "RAW"))]
    Raw,
}

impl fmt::Display for NormMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NormMode::Range0To100 => "RANGE_0_100",
            NormMode::RangeM100To100 => "RANGE_M100_100",
            NormMode::Raw => "RAW",
        })
    }
}

/// 标定时记录的原始位置范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionRange {
    pub min: i32,
    pub max: i32,
}

impl PositionRange {
    pub fn new(min: i32, max: i32) -> Result<Self, NormalizeError> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), NormalizeError> {
        if self.min >= self.max {
            return Err(NormalizeError::InvalidRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    fn span(&self) -> f64 {
        f64::from(self.max) - f64::from(self.min)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Invalid position range: min {min} must be below max {max}")]
    InvalidRange { min: i32, max: i32 },

    #[error("Value {0} cannot be mapped to a raw position")]
    NotFinite(f64),
}

/// 原始刻度 → 归一化值（先钳位到 `range` 内）
///
/// # 示例
///
/// ```rust
/// use servobus_protocol::{normalize, NormMode, PositionRange};
///
/// let range = PositionRange::new(1000, 3000).unwrap();
/// assert_eq!(normalize(2000, range, NormMode::RangeM100To100).unwrap(), 0.0);
/// assert_eq!(normalize(5000, range, NormMode::Range0To100).unwrap(), 100.0);
/// ```
pub fn normalize(raw: i32, range: PositionRange, mode: NormMode) -> Result<f64, NormalizeError> {
    range.validate()?;
    let clamped = f64::from(raw.clamp(range.min, range.max));
    let ratio = (clamped - f64::from(range.min)) / range.span();
    Ok(match mode {
        NormMode::Range0To100 => ratio * 100.0,
        NormMode::RangeM100To100 => ratio * 200.0 - 100.0,
        NormMode::Raw => f64::from(raw),
    })
}

/// 归一化值 → 原始刻度（四舍五入，钳位到 `range` 内）
pub fn unnormalize(value: f64, range: PositionRange, mode: NormMode) -> Result<i32, NormalizeError> {
    range.validate()?;
    if !value.is_finite() {
        return Err(NormalizeError::NotFinite(value));
    }

    let min = f64::from(range.min);
    let raw = match mode {
        NormMode::Range0To100 => min + value.clamp(0.0, 100.0) / 100.0 * range.span(),
        NormMode::RangeM100To100 => min + (value.clamp(-100.0, 100.0) + 100.0) / 200.0 * range.span(),
        NormMode::Raw => {
            if value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
                return Err(NormalizeError::NotFinite(value));
            }
            value
        },
    };
    Ok(raw.round() as i32)
}
