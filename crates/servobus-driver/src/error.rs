//! 驱动层错误类型定义

use servobus_protocol::{FrameError, ModelTag, NormalizeError, ProtocolVersion, RegisterError, StatusFlags};
use servobus_serial::TransportError;
use std::collections::BTreeMap;
use thiserror::Error;

/// 单次请求/应答交换的错误
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

impl ExchangeError {
    /// 设备没有应答
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExchangeError::Transport(TransportError::Timeout))
    }
}

/// 连接错误
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Bus already connected to '{port}'")]
    AlreadyConnected { port: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 设备发现错误
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// 协议 1（SCS 系列）固件不应答广播 Ping
    #[error("Broadcast ping is not supported by protocol {0:?}")]
    Unsupported(ProtocolVersion),

    #[error("Bus not connected")]
    NotConnected,

    /// 扫描在某个波特率失败，`scanned` 保留之前已完成的结果
    #[error("Scan stopped at {rate} bps after {} completed rates: {source}", .scanned.len())]
    ScanInterrupted {
        rate: u32,
        scanned: BTreeMap<u32, BTreeMap<u8, u16>>,
        #[source]
        source: Box<DiscoveryError>,
    },
}

impl DiscoveryError {
    fn is_fatal_transport(&self) -> bool {
        match self {
            DiscoveryError::Transport(TransportError::Io(_) | TransportError::Closed) => true,
            DiscoveryError::ScanInterrupted { source, .. } => source.is_fatal_transport(),
            _ => false,
        }
    }
}

impl From<ExchangeError> for DiscoveryError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Transport(e) => DiscoveryError::Transport(e),
            ExchangeError::Frame(e) => DiscoveryError::Frame(e),
        }
    }
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 总线层统一错误类型
///
/// 聚合传输层、帧编解码、寄存器表的错误，调用方只需要处理一种失败模型。
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Unknown actuator '{0}'")]
    UnknownActuator(String),

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

    #[error("Register '{0}' is read-only")]
    ReadOnlyRegister(&'static str),

    #[error("Bus not connected")]
    NotConnected,

    /// 状态帧错误位非零
    #[error("Device {id} reported error: {flags}")]
    DeviceFault { id: u8, flags: StatusFlags },

    #[error("Actuator '{actuator}' (id {id}) reports model number {actual}, expected {expected}")]
    ModelMismatch {
        actuator: String,
        id: u8,
        expected: u16,
        actual: u16,
    },

    /// 归一化需要标定范围
    #[error("Actuator '{0}' has no calibrated position range")]
    MissingCalibration(String),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    /// 单个舵机只能使用单播 ID（0..=MAX_ID）
    #[error("Id {id} of actuator '{name}' is not a unicast id (0..={max})")]
    InvalidId { id: u8, name: String, max: u8 },

    #[error("Id {id} of actuator '{name}' is already used by '{existing}'")]
    DuplicateId { id: u8, name: String, existing: String },

    #[error("Actuator '{0}' is already registered")]
    DuplicateName(String),

    /// 同步写要求所有目标的寄存器地址与宽度一致
    #[error("Register '{0}' has different layouts across the selected actuators")]
    SyncLayoutMismatch(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

impl BusError {
    /// 端口已失效（I/O 失败或已关闭），会话不能继续使用
    pub fn is_fatal_transport(&self) -> bool {
        match self {
            BusError::Transport(TransportError::Io(_) | TransportError::Closed) => true,
            BusError::Discovery(e) => e.is_fatal_transport(),
            _ => false,
        }
    }
}

impl From<ExchangeError> for BusError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Transport(e) => BusError::Transport(e),
            ExchangeError::Frame(e) => BusError::Frame(e),
        }
    }
}

impl From<RegisterError> for BusError {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::UnknownRegister { model, register } => BusError::UnknownRegister { model, register },
            RegisterError::UnknownModel(name) => BusError::UnknownModel(name),
            RegisterError::ValueOutOfRange {
                register,
                value,
                min,
                max,
            } => BusError::ValueOutOfRange {
                register,
                value,
                min,
                max,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        let err = BusError::UnknownActuator("elbow".to_string());
        assert_eq!(err.to_string(), "Unknown actuator 'elbow'");

        let err = BusError::DeviceFault {
            id: 3,
            flags: StatusFlags(0x20),
        };
        assert_eq!(err.to_string(), "Device 3 reported error: overload (0x20)");

        let err = BusError::ValueOutOfRange {
            register: "HomingOffset",
            value: 3000,
            min: -2047,
            max: 2047,
        };
        assert!(err.to_string().contains("[-2047, 2047]"));
    }

    #[test]
    fn test_from_register_error() {
        let err: BusError = RegisterError::UnknownRegister {
            model: ModelTag::Scs0009,
            register: "HomingOffset".to_string(),
        }
        .into();
        match err {
            BusError::UnknownRegister { model, register } => {
                assert_eq!(model, ModelTag::Scs0009);
                assert_eq!(register, "HomingOffset");
            },
            _ => panic!("Expected UnknownRegister variant"),
        }
    }

    #[test]
    fn test_from_exchange_error() {
        let err: BusError = ExchangeError::Transport(TransportError::Timeout).into();
        assert!(matches!(err, BusError::Transport(TransportError::Timeout)));

        let err: DiscoveryError = ExchangeError::Frame(FrameError::Malformed("x".to_string())).into();
        assert!(matches!(err, DiscoveryError::Frame(_)));
    }

    #[test]
    fn test_exchange_timeout() {
        assert!(ExchangeError::Transport(TransportError::Timeout).is_timeout());
        assert!(!ExchangeError::Transport(TransportError::Closed).is_timeout());
    }

    #[test]
    fn test_fatal_transport() {
        assert!(BusError::Transport(TransportError::Closed).is_fatal_transport());
        assert!(BusError::Discovery(DiscoveryError::Transport(TransportError::Io(std::io::Error::other("gone")))).is_fatal_transport());
        assert!(!BusError::Transport(TransportError::Timeout).is_fatal_transport());
        assert!(!BusError::NotConnected.is_fatal_transport());

        let interrupted = |source: DiscoveryError| DiscoveryError::ScanInterrupted {
            rate: 115_200,
            scanned: BTreeMap::new(),
            source: Box::new(source),
        };
        assert!(BusError::Discovery(interrupted(DiscoveryError::Transport(TransportError::Closed))).is_fatal_transport());
        assert!(!BusError::Discovery(interrupted(DiscoveryError::Frame(FrameError::Malformed("x".to_string())))).is_fatal_transport());
    }

    #[test]
    fn test_scan_interrupted_display() {
        let err = DiscoveryError::ScanInterrupted {
            rate: 115_200,
            scanned: BTreeMap::from([(1_000_000, BTreeMap::from([(1, 777)]))]),
            source: Box::new(DiscoveryError::Transport(TransportError::Closed)),
        };
        assert_eq!(err.to_string(), "Scan stopped at 115200 bps after 1 completed rates: Transport error: Port closed");
    }
}
