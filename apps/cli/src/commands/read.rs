//! 寄存器读取命令

use super::BusArgs;
use anyhow::Result;
use clap::Args;

/// 寄存器读取命令参数
#[derive(Args, Debug)]
pub struct ReadCommand {
    #[command(flatten)]
    pub bus: BusArgs,

    /// 舵机名称（配置中的键）
    #[arg(short, long)]
    pub actuator: String,

    /// 寄存器名称（忽略大小写和下划线）
    #[arg(short, long)]
    pub register: String,

    /// 按舵机的归一化模式换算位置类寄存器
    #[arg(short, long)]
    pub normalize: bool,
}

impl ReadCommand {
    pub fn execute(&self) -> Result<()> {
        let mut bus = self.bus.connect()?;
        let value = bus.read_register(&self.actuator, &self.register, self.normalize)?;
        println!("{}.{} = {}", self.actuator, self.register, value);
        bus.disconnect();
        Ok(())
    }
}
