//! ActuatorBus：按名称访问舵机的门面
//!
//! 组合注册表、寄存器表、会话与发现逻辑。名称解析都在发出任何字节之前完成，
//! 未知的舵机或寄存器不会产生线路流量。
//!
//! 总线从不自动校准：`read_register(.., normalize = false)` 返回原始刻度，
//! 需要校准信息时显式调用 [`ActuatorBus::check_calibration`]。

use crate::actuator::{Actuator, ActuatorRegistry};
use crate::config::{BusConfig, TimeoutConfig};
use crate::discovery;
use crate::error::{BusError, ConnectionError};
use crate::session::BusSession;
use serde::Serialize;
use servobus_protocol::{
    NormMode, NormalizeError, Packet, PositionCalibration, ProtocolVersion, RegisterDescriptor,
    calibrate_with_resolution, unnormalize,
};
use servobus_serial::{Transport, TransportError};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// 寄存器读数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Raw(i32),
    Normalized(f64),
}

impl RegisterValue {
    pub fn as_f64(self) -> f64 {
        match self {
            RegisterValue::Raw(v) => f64::from(v),
            RegisterValue::Normalized(v) => v,
        }
    }

    pub fn raw(self) -> Option<i32> {
        match self {
            RegisterValue::Raw(v) => Some(v),
            RegisterValue::Normalized(_) => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Raw(v) => write!(f, "{}", v),
            RegisterValue::Normalized(v) => write!(f, "{:.2}", v),
        }
    }
}

/// 单个舵机的校准诊断结果（每次重新读取，不缓存）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationRecord {
    pub actuator_name: String,
    pub id: u8,
    #[serde(flatten)]
    pub calibration: PositionCalibration,
}

/// 舵机总线
pub struct ActuatorBus {
    registry: ActuatorRegistry,
    timeouts: TimeoutConfig,
    session: Option<BusSession>,
}

impl ActuatorBus {
    pub fn new(registry: ActuatorRegistry) -> Self {
        Self {
            registry,
            timeouts: TimeoutConfig::default(),
            session: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// 根据配置构建（不连接）
    pub fn from_config(config: &BusConfig) -> Result<Self, BusError> {
        Ok(Self::new(config.registry()?).with_timeouts(config.timeouts))
    }

    pub fn registry(&self) -> &ActuatorRegistry {
        &self.registry
    }

    pub fn session(&self) -> Option<&BusSession> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(BusSession::is_connected)
    }

    /// 打开串口并建立会话
    ///
    /// # 错误
    /// - `ConnectionError::AlreadyConnected`: 已有会话
    /// - `ConnectionError::Transport`: 端口不可用
    pub fn connect(&mut self, port: &str, baud_rate: u32, protocol: ProtocolVersion) -> Result<(), ConnectionError> {
        self.ensure_disconnected()?;
        let session = BusSession::open(port, baud_rate, protocol, self.timeouts)?;
        self.attach(session);
        Ok(())
    }

    /// 使用外部提供的传输建立会话
    pub fn connect_with_transport(
        &mut self,
        transport: Box<dyn Transport>,
        protocol: ProtocolVersion,
    ) -> Result<(), ConnectionError> {
        self.ensure_disconnected()?;
        self.attach(BusSession::new(transport, protocol, self.timeouts));
        Ok(())
    }

    fn ensure_disconnected(&self) -> Result<(), ConnectionError> {
        match &self.session {
            Some(session) => Err(ConnectionError::AlreadyConnected {
                port: session.port_name().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn attach(&mut self, session: BusSession) {
        info!(
            port = session.port_name(),
            baud_rate = session.baud_rate(),
            protocol = ?session.protocol(),
            actuators = self.registry.len(),
            "Bus connected"
        );
        self.session = Some(session);
    }

    /// 关闭会话（幂等）
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            info!(port = session.port_name(), "Bus disconnected");
        }
    }

    /// 在会话上执行一次交换；端口失效时关闭会话，之后的调用返回 `NotConnected`
    fn exchange<T>(&mut self, f: impl FnOnce(&mut BusSession) -> Result<T, BusError>) -> Result<T, BusError> {
        let session = self.session.as_mut().ok_or(BusError::NotConnected)?;
        let result = f(session);
        if let Err(e) = &result {
            if e.is_fatal_transport() {
                warn!("Fatal transport error, closing bus session: {}", e);
                self.disconnect();
            }
        }
        result
    }

    /// 名称 → (舵机, 寄存器)，不产生线路流量
    fn resolve(&self, actuator: &str, register: &str) -> Result<(Actuator, &'static RegisterDescriptor), BusError> {
        let actuator = *self.registry.get(actuator)?;
        let descriptor = actuator.register(register)?;
        Ok((actuator, descriptor))
    }

    /// 读取寄存器
    ///
    /// `normalize = true` 时位置类寄存器按舵机的归一化模式换算（需要标定范围），
    /// 其他寄存器仍返回原始值。
    pub fn read_register(&mut self, actuator: &str, register: &str, normalize: bool) -> Result<RegisterValue, BusError> {
        let (target, descriptor) = self.resolve(actuator, register)?;
        let range = if normalize && descriptor.is_position() && target.norm_mode != NormMode::Raw {
            let range = target
                .range
                .ok_or_else(|| BusError::MissingCalibration(actuator.to_string()))?;
            Some(range)
        } else {
            None
        };

        let raw = self.exchange(|s| s.read_raw(target.id, descriptor))?.value;
        match range {
            Some(range) => Ok(RegisterValue::Normalized(servobus_protocol::normalize(
                raw,
                range,
                target.norm_mode,
            )?)),
            None => Ok(RegisterValue::Raw(raw)),
        }
    }

    /// 写入寄存器原始值（按宽度/符号检查，超范围不截断）
    pub fn write_register(&mut self, actuator: &str, register: &str, value: i64) -> Result<(), BusError> {
        let (target, descriptor) = self.resolve(actuator, register)?;
        self.exchange(|s| s.write_raw(target.id, descriptor, value))
    }

    /// 以归一化单位写入位置类寄存器
    pub fn write_normalized(&mut self, actuator: &str, register: &str, value: f64) -> Result<(), BusError> {
        let (target, descriptor) = self.resolve(actuator, register)?;
        let raw = if descriptor.is_position() && target.norm_mode != NormMode::Raw {
            let range = target
                .range
                .ok_or_else(|| BusError::MissingCalibration(actuator.to_string()))?;
            i64::from(unnormalize(value, range, target.norm_mode)?)
        } else {
            if !value.is_finite() {
                return Err(NormalizeError::NotFinite(value).into());
            }
            value.round() as i64
        };
        self.exchange(|s| s.write_raw(target.id, descriptor, raw))
    }

    /// 批量读取；单个舵机失败不影响其他舵机
    pub fn read_batch(
        &mut self,
        register: &str,
        names: &[&str],
        normalize: bool,
    ) -> Vec<(String, Result<RegisterValue, BusError>)> {
        names
            .iter()
            .map(|name| (name.to_string(), self.read_register(name, register, normalize)))
            .collect()
    }

    /// 读取当前位置并计算校准信息
    ///
    /// 归零偏移超出 `HomingOffset` 可表示的范围时记录警告，并以 `valid = false` 返回。
    pub fn calibration(&mut self, actuator: &str) -> Result<CalibrationRecord, BusError> {
        let (target, descriptor) = self.resolve(actuator, "PresentPosition")?;
        let raw = self.exchange(|s| s.read_raw(target.id, descriptor))?.value;
        let calibration = calibrate_with_resolution(raw, target.model.ticks_per_revolution());

        if !calibration.valid {
            let limit = calibration.ticks_per_revolution / 2 - 1;
            warn!(
                actuator,
                id = target.id,
                raw,
                homing_offset = calibration.homing_offset,
                "Homing offset exceeds ±{}, mechanical zero cannot be stored",
                limit
            );
        }

        Ok(CalibrationRecord {
            actuator_name: actuator.to_string(),
            id: target.id,
            calibration,
        })
    }

    /// 批量校准诊断；单个舵机失败不影响其他舵机
    pub fn check_calibration(&mut self, names: &[&str]) -> Vec<(String, Result<CalibrationRecord, BusError>)> {
        names
            .iter()
            .map(|name| (name.to_string(), self.calibration(name)))
            .collect()
    }

    /// Ping 指定舵机
    pub fn ping(&mut self, actuator: &str) -> Result<bool, BusError> {
        let id = self.registry.get(actuator)?.id;
        self.exchange(|s| s.ping(id))
    }

    /// 逐个确认注册表中的舵机在线且型号一致
    pub fn verify_actuators(&mut self) -> Vec<(String, Result<(), BusError>)> {
        let targets: Vec<(String, Actuator)> = self
            .registry
            .iter()
            .map(|(name, actuator)| (name.to_string(), *actuator))
            .collect();

        targets
            .into_iter()
            .map(|(name, actuator)| {
                let result = self.verify_one(&name, actuator);
                (name, result)
            })
            .collect()
    }

    fn verify_one(&mut self, name: &str, actuator: Actuator) -> Result<(), BusError> {
        let descriptor = actuator.register("ModelNumber")?;
        let actual = self.exchange(|session| {
            if !session.ping(actuator.id)? {
                return Err(BusError::Transport(TransportError::Timeout));
            }
            Ok(session.read_raw(actuator.id, descriptor)?.value as u16)
        })?;
        let expected = actuator.model.model_number();
        if actual != expected {
            return Err(BusError::ModelMismatch {
                actuator: name.to_string(),
                id: actuator.id,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// 同步写：一帧写入多个舵机的同一寄存器（无应答）
    ///
    /// 所有值在发送前完成检查，任何一个不合法都不会发出字节。
    pub fn sync_write(&mut self, register: &str, values: &[(&str, i64)]) -> Result<(), BusError> {
        let mut layout: Option<&'static RegisterDescriptor> = None;
        let mut targets = Vec::with_capacity(values.len());

        for (name, value) in values {
            let (target, descriptor) = self.resolve(name, register)?;
            if !descriptor.is_writable() {
                return Err(BusError::ReadOnlyRegister(descriptor.name));
            }
            match layout {
                Some(first) if first.address != descriptor.address || first.width != descriptor.width => {
                    return Err(BusError::SyncLayoutMismatch(register.to_string()));
                },
                Some(_) => {},
                None => layout = Some(descriptor),
            }
            targets.push((target.id, descriptor, *value));
        }

        let session = self.session.as_ref().ok_or(BusError::NotConnected)?;
        let order = session.protocol().byte_order();
        let entries = targets
            .into_iter()
            .map(|(id, descriptor, value)| Ok((id, descriptor.encode(value, order)?)))
            .collect::<Result<Vec<_>, BusError>>()?;

        let Some(descriptor) = layout else {
            return Ok(());
        };
        let packet = Packet::sync_write(
            descriptor.wire_address()?,
            descriptor.width.bytes() as u8,
            &entries,
        )?;
        self.exchange(|s| Ok(s.send(&packet)?))
    }

    /// 广播 Ping（见 [`discovery::broadcast_ping`]）
    pub fn broadcast_ping(&mut self, baud_rate: u32) -> Result<BTreeMap<u8, u16>, BusError> {
        self.exchange(|s| Ok(discovery::broadcast_ping(s, baud_rate)?))
    }

    /// 波特率扫描（见 [`discovery::scan_baud_rates`]）
    pub fn scan_baud_rates(&mut self, rates: &[u32]) -> Result<BTreeMap<u32, BTreeMap<u8, u16>>, BusError> {
        self.exchange(|s| Ok(discovery::scan_baud_rates(s, rates)?))
    }
}

impl Drop for ActuatorBus {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ActuatorBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorBus")
            .field("registry", &self.registry)
            .field("session", &self.session)
            .finish()
    }
}
