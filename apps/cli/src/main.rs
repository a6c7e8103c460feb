//! # SLSRX CLI
//!
//! Command-line front end for the slsrx train receiver.
//!
//! ```bash
//! # 生成默认配置
//! slsrx-cli config init
//!
//! # 模拟 Gotthard 探测器 1000 帧，每 10 帧一个 train，写原始文件
//! slsrx-cli simulate --detector gotthard --frames-per-train 10 --max-frames 1000 --raw-dir /tmp
//!
//! # 录制后离线查看
//! slsrx-cli simulate --max-frames 500 --record run.slsrx
//! slsrx-cli inspect run.slsrx
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{CliConfig, ConfigCommand, InspectCommand, SimulateCommand};

/// SLSRX CLI - 探测器 train 接收工具
#[derive(Parser, Debug)]
#[command(name = "slsrx-cli")]
#[command(about = "Frame-to-train receiver for sls detectors", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认位于用户配置目录）
    #[arg(long, global = true, env = "SLSRX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行模拟探测器并组装 train
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },

    /// 查看 train 录制文件
    Inspect {
        #[command(flatten)]
        args: InspectCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slsrx_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => commands::config::default_config_file()?,
    };

    match cli.command {
        Commands::Simulate { args } => {
            let config = CliConfig::load(&config_path)?;
            args.execute(config)
        },

        Commands::Inspect { args } => args.execute(),

        Commands::Config(cmd) => cmd.execute(&config_path),
    }
}
