//! 引擎层错误类型定义

use slsrx_protocol::{AcquisitionEpoch, ProtocolError};
use thiserror::Error;

/// 引擎层错误类型
///
/// 帧路径上的可恢复情况（格式错误、溢出、解码失败、背压）不会以错误返回，
/// 只记录日志和指标；这里只包含控制路径（启动/停止/构建）的错误。
#[derive(Error, Debug)]
pub enum EngineError {
    /// 协议层错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 采集进行中，不能重新开始（frames_per_train 在采集期间不可更改）
    #[error("Acquisition {0} is already running")]
    AcquisitionActive(AcquisitionEpoch),

    /// 采集参数中的像素数与解码器不一致
    #[error("Detector size mismatch: decoder expects {expected} pixels, acquisition announced {actual}")]
    DetectorSizeMismatch { expected: usize, actual: usize },

    /// 纪元不匹配（来自已结束采集的残留调用）
    #[error("Stale acquisition epoch {got} (current {current})")]
    StaleEpoch {
        current: AcquisitionEpoch,
        got: AcquisitionEpoch,
    },

    /// 没有正在进行的采集
    #[error("No acquisition running")]
    NotRunning,

    /// 缺少解码器
    #[error("Frame decoder not set")]
    MissingDecoder,

    /// 发布通道已关闭（发布线程退出）
    #[error("Publisher channel closed")]
    ChannelClosed,

    /// 线程创建失败
    #[error("Thread spawn error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::DetectorSizeMismatch {
            expected: 1280,
            actual: 4,
        };
        assert!(err.to_string().contains("1280"));
        assert!(err.to_string().contains("4"));

        let err = EngineError::StaleEpoch {
            current: AcquisitionEpoch(3),
            got: AcquisitionEpoch(2),
        };
        assert_eq!(err.to_string(), "Stale acquisition epoch #2 (current #3)");

        let err: EngineError = ProtocolError::InvalidShape("[]".to_string()).into();
        assert!(matches!(err, EngineError::Protocol(_)));
    }
}
