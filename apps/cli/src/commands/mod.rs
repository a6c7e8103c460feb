//! 命令定义和实现

pub mod config;
pub mod inspect;
pub mod simulate;

pub use config::{CliConfig, ConfigCommand};
pub use inspect::InspectCommand;
pub use simulate::SimulateCommand;
