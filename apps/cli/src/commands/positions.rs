//! 位置与归零偏移报告

use super::BusArgs;
use crate::output::{OutputFormat, PositionRow, render_positions_table};
use anyhow::Result;
use clap::Args;

/// 位置报告命令参数
#[derive(Args, Debug)]
pub struct PositionsCommand {
    #[command(flatten)]
    pub bus: BusArgs,

    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl PositionsCommand {
    /// 每个舵机读取一次当前位置；单个舵机失败只影响它自己那一行
    pub fn execute(&self) -> Result<()> {
        let mut bus = self.bus.connect()?;

        let names = bus.registry().names();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let results = bus.check_calibration(&refs);

        let rows: Vec<PositionRow> = results
            .into_iter()
            .map(|(name, result)| {
                let id = bus.registry().get(&name).ok().map(|a| a.id);
                PositionRow::from_result(name, id, result)
            })
            .collect();

        match self.format {
            OutputFormat::Table => print!("{}", render_positions_table(&rows)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        }

        bus.disconnect();
        Ok(())
    }
}
