//! 波特率扫描命令

use crate::output::OutputFormat;
use anyhow::{Context, Result, anyhow};
use clap::Args;
use servobus_driver::protocol::{ModelTag, ProtocolVersion, SUPPORTED_BAUD_RATES};
use servobus_driver::{ActuatorBus, ActuatorRegistry, BusError, DiscoveryError};
use std::collections::BTreeMap;

/// 扫描命令参数
#[derive(Args, Debug)]
pub struct ScanCommand {
    /// 串口
    #[arg(short, long)]
    pub port: String,

    /// 要尝试的波特率（逗号分隔，默认全部支持的波特率）
    #[arg(short, long, value_delimiter = ',')]
    pub baud_rates: Vec<u32>,

    /// 协议版本（0: STS/SMS，1: SCS）
    #[arg(long, default_value_t = 0)]
    pub protocol: u8,

    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl ScanCommand {
    pub fn execute(&self) -> Result<()> {
        let protocol =
            ProtocolVersion::try_from(self.protocol).map_err(|_| anyhow!("不支持的协议版本: {}", self.protocol))?;
        let rates = self.rates();

        let mut bus = ActuatorBus::new(ActuatorRegistry::new());
        bus.connect(&self.port, rates[0], protocol)
            .with_context(|| format!("连接 {} 失败", self.port))?;

        eprintln!("⏳ 正在扫描 {} 个波特率...", rates.len());
        let outcome = bus.scan_baud_rates(&rates);
        bus.disconnect();

        match outcome {
            Ok(found) => self.print(&found),
            // 已完成的波特率仍然输出
            Err(BusError::Discovery(DiscoveryError::ScanInterrupted { rate, scanned, source })) => {
                self.print(&scanned)?;
                Err(anyhow!("扫描在 {} bps 中断: {}", rate, source))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn print(&self, found: &BTreeMap<u32, BTreeMap<u8, u16>>) -> Result<()> {
        match self.format {
            OutputFormat::Table => print!("{}", render_scan(found)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(found)?),
        }
        Ok(())
    }

    fn rates(&self) -> Vec<u32> {
        if self.baud_rates.is_empty() {
            SUPPORTED_BAUD_RATES.to_vec()
        } else {
            self.baud_rates.clone()
        }
    }
}

fn render_scan(found: &BTreeMap<u32, BTreeMap<u8, u16>>) -> String {
    let mut out = String::new();
    for (rate, devices) in found.iter().rev() {
        if devices.is_empty() {
            out.push_str(&format!("{:>8} bps: -\n", rate));
            continue;
        }
        let list: Vec<String> = devices
            .iter()
            .map(|(id, model_number)| match ModelTag::from_model_number(*model_number) {
                Some(model) => format!("id {} ({})", id, model),
                None => format!("id {} (model {})", id, model_number),
            })
            .collect();
        out.push_str(&format!("{:>8} bps: {}\n", rate, list.join(", ")));
    }
    out
}
