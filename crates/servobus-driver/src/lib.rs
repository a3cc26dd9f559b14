//! 舵机总线驱动层
//!
//! 在串口传输和帧编解码之上提供按名称访问舵机的接口：
//! - [`BusSession`]：独占端口的请求/应答交换
//! - [`discovery`]：广播 Ping 与波特率扫描
//! - [`ActuatorBus`]：名称 → ID/型号/寄存器的门面，含位置校准诊断
//! - [`SharedBus`]：跨线程共享时的显式同步
//!
//! # 示例
//!
//! ```no_run
//! use servobus_driver::{ActuatorBus, BusConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::load("configs/so101_follower.toml")?;
//! let mut bus = ActuatorBus::from_config(&config)?;
//! bus.connect(&config.port, config.baud_rate, config.protocol()?)?;
//!
//! let position = bus.read_register("elbow_flex", "PresentPosition", false)?;
//! println!("elbow_flex: {}", position);
//! # Ok(())
//! # }
//! ```

mod actuator;
mod bus;
mod config;
pub mod discovery;
mod error;
mod session;
mod shared;

pub use actuator::{Actuator, ActuatorRegistry};
pub use bus::{ActuatorBus, CalibrationRecord, RegisterValue};
pub use config::{ActuatorConfig, BusConfig, TimeoutConfig};
pub use error::{BusError, ConfigError, ConnectionError, DiscoveryError, ExchangeError};
pub use session::BusSession;
pub use shared::SharedBus;

pub use servobus_protocol as protocol;
pub use servobus_serial as serial;
