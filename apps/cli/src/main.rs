//! # Servobus CLI
//!
//! 舵机总线诊断工具。每条命令都是一次性的：连接 -> 执行 -> 断开。
//!
//! ```bash
//! # 在所有支持的波特率下扫描设备
//! servobus scan --port /dev/ttyACM0
//!
//! # 查看各舵机的位置与归零偏移
//! servobus positions --config configs/so101_follower.toml
//!
//! # 读写单个寄存器
//! servobus read --config configs/so101_follower.toml --actuator gripper --register PresentPosition
//! servobus write --config configs/so101_follower.toml --actuator gripper --register TorqueEnable --value 0
//! ```
//!
//! 日志级别通过 `RUST_LOG` 控制，默认 `servobus=info`。

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{PositionsCommand, ReadCommand, ScanCommand, WriteCommand};

/// Servobus CLI - 舵机总线诊断工具
#[derive(Parser, Debug)]
#[command(name = "servobus")]
#[command(about = "Diagnostic tool for Feetech serial servo buses", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 扫描波特率并列出应答的设备
    Scan {
        #[command(flatten)]
        args: ScanCommand,
    },

    /// 报告各舵机的位置与归零偏移
    Positions {
        #[command(flatten)]
        args: PositionsCommand,
    },

    /// 读取寄存器
    Read {
        #[command(flatten)]
        args: ReadCommand,
    },

    /// 写入寄存器
    Write {
        #[command(flatten)]
        args: WriteCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("servobus=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { args } => args.execute(),
        Commands::Positions { args } => args.execute(),
        Commands::Read { args } => args.execute(),
        Commands::Write { args } => args.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_positions() {
        let cli = Cli::try_parse_from([
            "servobus",
            "positions",
            "--config",
            "bus.toml",
            "--format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Positions { .. }));
    }

    #[test]
    fn test_write_requires_value() {
        let result = Cli::try_parse_from([
            "servobus",
            "write",
            "--config",
            "bus.toml",
            "--actuator",
            "gripper",
            "--register",
            "GoalPosition",
        ]);
        assert!(result.is_err());
    }
}
