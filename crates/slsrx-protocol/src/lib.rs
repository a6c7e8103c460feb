//! # SLSRX Protocol
//!
//! sls 探测器接收端的协议层定义（无线程、无 IO）
//!
//! ## 模块
//!
//! - `header`: 48 字节探测器帧头解析、`FrameHeader` 值类型
//! - `detector`: 探测器类型枚举
//! - `decoder`: `FrameDecoder` 能力接口和按探测器家族的掩码解码器
//! - `params`: 采集参数与采集纪元（epoch）
//!
//! ## 字节序
//!
//! 探测器帧头和像素数据均为小端字节序（little-endian）。

pub mod decoder;
pub mod detector;
pub mod header;
pub mod params;

pub use decoder::{FrameDecoder, MaskedDecoder};
pub use detector::DetectorType;
pub use header::{DETECTOR_HEADER_SIZE, DetectorHeader, FrameHeader};
pub use params::{
    AcquisitionEpoch, AcquisitionParams, DEFAULT_STORAGE_CELL_START, MAX_STORAGE_CELL,
};

use smallvec::SmallVec;
use thiserror::Error;

/// 数组形状（维度列表）
///
/// 探测器的显示形状最多 2 维，DAQ 形状最多 3 维，4 个内联槽位足够避免堆分配。
pub type Shape = SmallVec<[usize; 4]>;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown detector type: {0}")]
    UnknownDetectorType(u8),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Frame index {index} out of range ({frames} frames in payload)")]
    FrameIndexOutOfRange { index: usize, frames: usize },
}

/// 小端字节序读取 u16
pub fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// 小端字节序读取 u32
pub fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// 小端字节序读取 u64
pub fn read_u64_le(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
