//! 寄存器写入命令

use super::BusArgs;
use anyhow::{Result, bail};
use clap::Args;

/// 寄存器写入命令参数
#[derive(Args, Debug)]
pub struct WriteCommand {
    #[command(flatten)]
    pub bus: BusArgs,

    /// 舵机名称（配置中的键）
    #[arg(short, long)]
    pub actuator: String,

    /// 寄存器名称（忽略大小写和下划线）
    #[arg(short, long)]
    pub register: String,

    /// 写入的值（原始刻度；配合 --normalized 时为归一化单位）
    #[arg(short, long, allow_negative_numbers = true)]
    pub value: f64,

    /// 按舵机的归一化模式换算
    #[arg(short, long)]
    pub normalized: bool,
}

impl WriteCommand {
    pub fn execute(&self) -> Result<()> {
        let raw = if self.normalized { None } else { Some(self.raw_value()?) };

        let mut bus = self.bus.connect()?;
        match raw {
            Some(raw) => bus.write_register(&self.actuator, &self.register, raw)?,
            None => bus.write_normalized(&self.actuator, &self.register, self.value)?,
        }
        println!("✅ {}.{} <- {}", self.actuator, self.register, self.value);
        bus.disconnect();
        Ok(())
    }

    /// 原始值必须是整数
    fn raw_value(&self) -> Result<i64> {
        if self.value.fract() != 0.0 || !self.value.is_finite() {
            bail!("原始寄存器值必须是整数: {}", self.value);
        }
        Ok(self.value as i64)
    }
}
