//! 接收引擎模块
//!
//! 本模块把采集库逐帧推送的原始数据重新组装为 train，并交给下游输出：
//! - 双缓冲（两块 `TrainBuffer` 通过通道在生产者和发布线程之间转移所有权）
//! - train 边界判定（关联 ID / 存储单元 / 计数回退）
//! - 有界等待的背压策略（超时丢弃最旧的未发送 train）
//! - 发布线程（严格按边界检测顺序调用 `OutputSink`）
//! - 帧率统计（ArcSwap 无锁读取）与原子计数器指标
//!
//! # 数据流
//!
//! ```text
//! 采集库 ─on_frame_ready─▶ TrainAssembler ──(TrainBuffer 所有权)──▶ publisher_loop ─▶ SinkSet
//!                               ▲                                          │
//!                               └───────────── BufferPool（归还） ◀────────┘
//! ```

mod assembler;
mod builder;
pub mod config;
mod engine;
mod error;
pub mod metrics;
pub mod pool;
pub mod publisher;
pub mod rate;
pub mod sink;
pub mod train_buffer;
pub mod warn_limit;

pub use assembler::{
    AssemblerState, BoundaryMode, IngestOutcome, IngestReport, RejectReason, TrainAssembler,
};
pub use builder::EngineBuilder;
pub use config::AssemblerConfig;
pub use engine::ReceiverEngine;
pub use error::EngineError;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pool::BufferPool;
pub use publisher::{PublisherMessage, publisher_loop};
pub use rate::{RateSnapshot, RateTracker};
pub use sink::{ChannelSink, OutputSink, OwnedTrain, SinkError, SinkEvent, SinkSet, TrainView};
pub use train_buffer::{NO_MEMORY_CELL, TrainBuffer};
pub use warn_limit::WarnLimiter;
