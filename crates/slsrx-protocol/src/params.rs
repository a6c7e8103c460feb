//! 采集参数

use std::fmt;

/// 默认起始存储单元（burst 模式下 train 的第一个存储单元）
pub const DEFAULT_STORAGE_CELL_START: u8 = 15;

/// 最大存储单元索引
pub const MAX_STORAGE_CELL: u8 = 15;

/// 采集开始时由采集库传入的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcquisitionParams {
    /// 单帧像素数
    pub detector_size: usize,
    /// 每个 train 的最大帧数
    pub frames_per_train: usize,
    /// burst（存储单元）模式：以存储单元作为 train 边界信号
    pub burst_mode: bool,
    /// burst 模式下 train 的起始存储单元（0-15）
    pub storage_cell_start: u8,
}

impl AcquisitionParams {
    pub fn new(detector_size: usize, frames_per_train: usize) -> Self {
        Self {
            detector_size,
            frames_per_train,
            burst_mode: false,
            storage_cell_start: DEFAULT_STORAGE_CELL_START,
        }
    }

    /// 启用 burst 模式
    pub fn with_burst_mode(mut self, storage_cell_start: u8) -> Self {
        self.burst_mode = true;
        self.storage_cell_start = storage_cell_start.min(MAX_STORAGE_CELL);
        self
    }
}

/// 采集纪元（每次采集开始时单调递增）
///
/// 每个帧回调都携带纪元，用于拒绝 stop/start 竞争中残留的旧数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcquisitionEpoch(pub u64);

impl AcquisitionEpoch {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for AcquisitionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params = AcquisitionParams::new(1280, 10);
        assert!(!params.burst_mode);
        assert_eq!(params.storage_cell_start, 15);
    }

    #[test]
    fn test_burst_mode_clamps_cell() {
        let params = AcquisitionParams::new(4, 16).with_burst_mode(20);
        assert!(params.burst_mode);
        assert_eq!(params.storage_cell_start, 15);
    }

    #[test]
    fn test_epoch_next() {
        let epoch = AcquisitionEpoch::default();
        assert_eq!(epoch.next(), AcquisitionEpoch(1));
        assert_eq!(AcquisitionEpoch(7).to_string(), "#7");
    }
}
