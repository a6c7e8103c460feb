//! # SLSRX Tools - 输出端和数据格式
//!
//! **依赖原则**: 只依赖 `slsrx-engine` 的 `OutputSink` 接口，不依赖帧源
//!
//! ## 包含模块
//!
//! - `raw_file` - 原始数据文件输出（按帧数滚动）
//! - `recording` - train 录制格式（bincode）
//! - `display` - 在线显示抽帧
//! - `statistics` - train 统计（可选）
//!
//! ## Feature Flags
//!
//! - `default` - 无默认 features
//! - `full` - 启用所有功能（包含 statistics）
//! - `statistics` - 启用统计模块

pub mod display;
pub mod raw_file;
pub mod recording;

// ⭐ 可选模块（通过 feature flags 控制）
#[cfg(feature = "statistics")]
pub mod statistics;

// 重新导出常用类型
pub use display::{DisplayData, DisplayFrame, DisplaySink};
pub use raw_file::{MAX_FRAMES_PER_FILE, RawFileSink};
pub use recording::{MAGIC, RecordingMetadata, RecordingSink, TrainRecording};
#[cfg(feature = "statistics")]
pub use statistics::{RunStatistics, StatisticsSink, TrainStatistics};
