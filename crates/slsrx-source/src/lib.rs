//! # SLSRX Source Layer
//!
//! 采集库回调契约与模拟探测器帧源。
//!
//! 引擎只通过 [`AcquisitionHandler`] 接收数据；真实的 UDP/TCP 接收端库与
//! [`SimulatedDetector`] 都是这个契约的调用方。

pub mod simulation;

pub use simulation::{DetectorSettings, SimulatedDetector, SimulationConfig, baseline_noise};

use slsrx_protocol::{AcquisitionEpoch, AcquisitionParams, DetectorType, FrameHeader, ProtocolError};
use thiserror::Error;

/// 帧源层统一错误类型
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Acquisition rejected: {0}")]
    Rejected(String),
    #[error("Source already running")]
    AlreadyRunning,
    #[error("Source not running")]
    NotRunning,
    #[error("Unsupported detector type: {0}")]
    UnsupportedDetector(DetectorType),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Data thread error: {0}")]
    Thread(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// 采集库入站回调契约
///
/// # 线程模型
///
/// - `on_acquisition_start` / `on_acquisition_stop` 由控制线程调用
/// - `on_frame_ready` 可能由采集库的专用 IO 线程调用，与 start/stop 不在同一线程
/// - `buffer` 只在回调期间有效，实现不得跨调用保留引用
///
/// # 纪元
///
/// `on_acquisition_start` 返回本次采集的纪元，调用方必须在后续每个
/// `on_frame_ready` / `on_acquisition_stop` 中原样传回，用于拒绝旧采集的残留数据。
pub trait AcquisitionHandler: Send + Sync {
    /// 采集开始
    fn on_acquisition_start(
        &self,
        params: &AcquisitionParams,
    ) -> Result<AcquisitionEpoch, SourceError>;

    /// 一个回调负载就绪（可能包含多帧，字节数为 `buffer.len()`）
    fn on_frame_ready(&self, epoch: AcquisitionEpoch, header: &FrameHeader, buffer: &[u8]);

    /// 采集结束
    fn on_acquisition_stop(&self, epoch: AcquisitionEpoch, total_frames_seen: u64);
}
