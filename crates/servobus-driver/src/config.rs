//! 总线配置
//!
//! TOML 格式：
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! baud_rate = 1000000
//! protocol_version = 0
//!
//! [timeouts]
//! latency_timer_ms = 16
//! quiet_window_ms = 30
//!
//! [actuators.shoulder_pan]
//! id = 1
//! model = "sts3215"
//! norm_mode = "RANGE_M100_100"
//! range = { min = 1024, max = 3072 }
//! ```

use crate::actuator::{Actuator, ActuatorRegistry};
use crate::error::{BusError, ConfigError};
use serde::{Deserialize, Serialize};
use servobus_protocol::{
    DEFAULT_BAUD_RATE, MAX_ID, ModelTag, NormMode, PositionRange, ProtocolVersion, byte_time_ms,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// 超时参数
///
/// 单帧超时沿用厂商 SDK 的公式：
/// `byte_time * len + 2 * latency_timer + 2ms`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// USB 串口芯片的延迟定时器
    pub latency_timer_ms: u64,
    /// 广播 Ping 收集应答时的静默判定窗口
    pub quiet_window_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            latency_timer_ms: 16,
            quiet_window_ms: 30,
        }
    }
}

impl TimeoutConfig {
    /// 等待 `len` 字节应答的超时
    pub fn packet_timeout(&self, baud_rate: u32, len: usize) -> Duration {
        let ms = byte_time_ms(baud_rate) * len as f64 + 2.0 * self.latency_timer_ms as f64 + 2.0;
        Duration::from_secs_f64(ms / 1000.0)
    }

    /// 广播 Ping 的总窗口（所有 ID 都应答所需的最长时间）
    pub fn broadcast_window(&self, baud_rate: u32) -> Duration {
        let max_id = f64::from(MAX_ID);
        let ms = 6.0 * max_id * byte_time_ms(baud_rate) + 3.0 * max_id + self.latency_timer_ms as f64;
        Duration::from_secs_f64(ms / 1000.0)
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }
}

/// 单个舵机的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub id: u8,
    pub model: String,
    #[serde(default)]
    pub norm_mode: NormMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<PositionRange>,
}

/// 总线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub protocol_version: u8,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub actuators: BTreeMap<String, ActuatorConfig>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl BusConfig {
    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn protocol(&self) -> Result<ProtocolVersion, ConfigError> {
        ProtocolVersion::try_from(self.protocol_version).map_err(|_| {
            ConfigError::Invalid(format!(
                "unsupported protocol_version {}",
                self.protocol_version
            ))
        })
    }

    /// 构建舵机注册表
    ///
    /// 型号名、ID 唯一性、标定范围都在这里检查，不会等到第一次通信才暴露。
    pub fn registry(&self) -> Result<ActuatorRegistry, BusError> {
        let mut registry = ActuatorRegistry::new();
        for (name, cfg) in &self.actuators {
            let model = cfg.model.parse::<ModelTag>()?;
            if let Some(range) = cfg.range {
                range.validate()?;
            }
            let actuator = Actuator::new(cfg.id, model, cfg.norm_mode);
            let actuator = match cfg.range {
                Some(range) => actuator.with_range(range),
                None => actuator,
            };
            registry.insert(name, actuator)?;
        }
        Ok(registry)
    }
}
