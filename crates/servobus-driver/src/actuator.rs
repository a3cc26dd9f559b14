//! 舵机注册表
//!
//! 逻辑名称 → [`Actuator`]。创建后不可变，ID 在同一条总线上唯一。

use crate::error::BusError;
use servobus_protocol::{MAX_ID, ModelTag, NormMode, PositionRange, RegisterDescriptor, lookup};
use std::collections::BTreeMap;

/// 总线上的一个舵机
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuator {
    pub id: u8,
    pub model: ModelTag,
    pub norm_mode: NormMode,
    /// 标定时记录的位置范围（归一化需要）
    pub range: Option<PositionRange>,
}

impl Actuator {
    pub fn new(id: u8, model: ModelTag, norm_mode: NormMode) -> Self {
        Self {
            id,
            model,
            norm_mode,
            range: None,
        }
    }

    pub fn with_range(mut self, range: PositionRange) -> Self {
        self.range = Some(range);
        self
    }

    /// 查找该型号的寄存器
    pub fn register(&self, name: &str) -> Result<&'static RegisterDescriptor, BusError> {
        Ok(lookup(self.model, name)?)
    }
}

/// 舵机注册表
#[derive(Debug, Clone, Default)]
pub struct ActuatorRegistry {
    actuators: BTreeMap<String, Actuator>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册舵机
    ///
    /// # 错误
    /// - `BusError::InvalidId`: ID 超过 `MAX_ID`（广播 ID 和 0xFF 都不能分配给单个舵机）
    /// - `BusError::DuplicateName`: 名称已存在
    /// - `BusError::DuplicateId`: ID 已被其他舵机占用
    pub fn insert(&mut self, name: impl Into<String>, actuator: Actuator) -> Result<(), BusError> {
        let name = name.into();
        if actuator.id > MAX_ID {
            return Err(BusError::InvalidId {
                id: actuator.id,
                name,
                max: MAX_ID,
            });
        }
        if self.actuators.contains_key(&name) {
            return Err(BusError::DuplicateName(name));
        }
        if let Some((existing, _)) = self.actuators.iter().find(|(_, a)| a.id == actuator.id) {
            return Err(BusError::DuplicateId {
                id: actuator.id,
                name,
                existing: existing.clone(),
            });
        }
        self.actuators.insert(name, actuator);
        Ok(())
    }

    pub fn with(mut self, name: impl Into<String>, actuator: Actuator) -> Result<Self, BusError> {
        self.insert(name, actuator)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Actuator, BusError> {
        self.actuators
            .get(name)
            .ok_or_else(|| BusError::UnknownActuator(name.to_string()))
    }

    /// 按 ID 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Actuator)> {
        let mut entries: Vec<_> = self.actuators.iter().map(|(n, a)| (n.as_str(), a)).collect();
        entries.sort_by_key(|(_, a)| a.id);
        entries.into_iter()
    }

    /// 按 ID 升序排列的名称
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|(name, _)| name.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}
