//! 配置管理命令
//!
//! CLI 配置保存为 TOML，默认位于 `{config_dir}/slsrx/config.toml`

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use slsrx_engine::AssemblerConfig;
use slsrx_protocol::DetectorType;
use slsrx_source::SimulationConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件路径
pub fn default_config_file() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    path.push("slsrx");
    path.push("config.toml");
    Ok(path)
}

/// 输出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 原始文件目录（None 表示不写原始文件）
    pub raw_dir: Option<PathBuf>,

    /// 原始文件名前缀
    pub raw_name: String,

    /// train 录制文件
    pub record: Option<PathBuf>,

    /// 每个 train 中送显示的帧序号
    pub display_frame: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            raw_dir: None,
            raw_name: slsrx_tools::raw_file::DEFAULT_NAME.to_string(),
            record: None,
            display_frame: None,
        }
    }
}

/// CLI 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 探测器类型
    pub detector: DetectorType,

    pub assembler: AssemblerConfig,

    pub simulation: SimulationConfig,

    pub output: OutputConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            detector: DetectorType::Gotthard,
            assembler: AssemblerConfig::default(),
            simulation: SimulationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认配置）
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, format!("# SLSRX CLI Configuration\n\n{}", content))
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示当前配置（TOML）
    Show,

    /// 写入默认配置
    Init {
        /// 覆盖已存在的配置文件
        #[arg(short, long)]
        force: bool,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                let config = CliConfig::load(path)?;
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            },

            ConfigCommand::Init { force } => {
                if path.exists() && !force {
                    anyhow::bail!(
                        "config {} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                CliConfig::default().save(path)?;
                println!("✅ Wrote default config to {}", path.display());
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", path.display());
                Ok(())
            },
        }
    }
}
