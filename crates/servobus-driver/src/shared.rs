//! 跨线程共享的总线句柄
//!
//! 半双工总线同一时刻只能有一个请求在途。[`SharedBus`] 用一把互斥锁包住
//! [`ActuatorBus`]，每个方法在整个请求/应答交换期间持有锁，
//! 两个线程的帧不会在线路上交错。

use crate::bus::{ActuatorBus, CalibrationRecord, RegisterValue};
use crate::error::BusError;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// 可 Clone 的共享总线
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<ActuatorBus>>,
}

impl SharedBus {
    pub fn new(bus: ActuatorBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// 独占总线，用于需要连续多次交换的场景（如先读后写）
    pub fn lock(&self) -> MutexGuard<'_, ActuatorBus> {
        self.inner.lock()
    }

    /// 在锁内执行闭包
    pub fn with<R>(&self, f: impl FnOnce(&mut ActuatorBus) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn read_register(&self, actuator: &str, register: &str, normalize: bool) -> Result<RegisterValue, BusError> {
        self.inner.lock().read_register(actuator, register, normalize)
    }

    pub fn write_register(&self, actuator: &str, register: &str, value: i64) -> Result<(), BusError> {
        self.inner.lock().write_register(actuator, register, value)
    }

    pub fn check_calibration(&self, names: &[&str]) -> Vec<(String, Result<CalibrationRecord, BusError>)> {
        self.inner.lock().check_calibration(names)
    }
}

impl From<ActuatorBus> for SharedBus {
    fn from(bus: ActuatorBus) -> Self {
        Self::new(bus)
    }
}

impl std::fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_lock() {
            Some(bus) => f.debug_tuple("SharedBus").field(&*bus).finish(),
            None => f.write_str("SharedBus(<locked>)"),
        }
    }
}
