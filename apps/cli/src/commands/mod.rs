//! 命令定义和实现

pub mod positions;
pub mod read;
pub mod scan;
pub mod write;

pub use positions::PositionsCommand;
pub use read::ReadCommand;
pub use scan::ScanCommand;
pub use write::WriteCommand;

use anyhow::{Context, Result};
use clap::Args;
use servobus_driver::{ActuatorBus, BusConfig};
use std::path::PathBuf;
use tracing::debug;

/// 基于配置文件连接总线的公共参数
#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// 总线配置文件（TOML）
    #[arg(short, long)]
    pub config: PathBuf,

    /// 串口（覆盖配置）
    #[arg(short, long)]
    pub port: Option<String>,
}

impl BusArgs {
    /// 加载配置并连接
    pub fn connect(&self) -> Result<ActuatorBus> {
        let config = BusConfig::load(&self.config)?;
        debug!(config = %self.config.display(), actuators = config.actuators.len(), "Loaded bus config");

        let mut bus = ActuatorBus::from_config(&config)?;
        let port = self.port.as_deref().unwrap_or(&config.port);
        bus.connect(port, config.baud_rate, config.protocol()?)
            .with_context(|| format!("连接 {} 失败", port))?;
        Ok(bus)
    }
}
