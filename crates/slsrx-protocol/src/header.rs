//! 帧头定义
//!
//! - [`DetectorHeader`]: 接收端库随每帧传递的 48 字节原始帧头
//! - [`FrameHeader`]: 引擎使用的精简值类型（帧号、关联 ID、存储单元、到达时间）

use crate::{ProtocolError, read_u16_le, read_u32_le, read_u64_le};

/// 原始探测器帧头长度（字节）
pub const DETECTOR_HEADER_SIZE: usize = 48;

/// 关联 ID 的"不可用"哨兵值（全 1）
pub const CORRELATION_ID_SENTINEL: u64 = u64::MAX;

/// 原始探测器帧头（小端，48 字节）
///
/// 布局：
///
/// ```text
/// offset  size  field
/// 0       8     frame_number
/// 8       4     exp_length
/// 12      4     packet_number
/// 16      8     det_spec1 (bunch id)
/// 24      8     timestamp
/// 32      2     mod_id
/// 34      2     row
/// 36      2     column
/// 38      2     reserved
/// 40      4     debug
/// 44      2     round_r_number
/// 46      1     det_type
/// 47      1     version
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorHeader {
    pub frame_number: u64,
    pub exp_length: u32,
    pub packet_number: u32,
    pub det_spec1: u64,
    pub timestamp: u64,
    pub mod_id: u16,
    pub row: u16,
    pub column: u16,
    pub reserved: u16,
    pub debug: u32,
    pub round_r_number: u16,
    pub det_type: u8,
    pub version: u8,
}

impl DetectorHeader {
    /// 从字节解析帧头
    ///
    /// # 错误
    ///
    /// 输入不足 48 字节时返回 `ProtocolError::InvalidLength`。
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < DETECTOR_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: DETECTOR_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            frame_number: read_u64_le(bytes, 0),
            exp_length: read_u32_le(bytes, 8),
            packet_number: read_u32_le(bytes, 12),
            det_spec1: read_u64_le(bytes, 16),
            timestamp: read_u64_le(bytes, 24),
            mod_id: read_u16_le(bytes, 32),
            row: read_u16_le(bytes, 34),
            column: read_u16_le(bytes, 36),
            reserved: read_u16_le(bytes, 38),
            debug: read_u32_le(bytes, 40),
            round_r_number: read_u16_le(bytes, 44),
            det_type: bytes[46],
            version: bytes[47],
        })
    }

    /// 编码为 48 字节
    pub fn to_bytes(&self) -> [u8; DETECTOR_HEADER_SIZE] {
        let mut out = [0u8; DETECTOR_HEADER_SIZE];
        out[0..8].copy_from_slice(&self.frame_number.to_le_bytes());
        out[8..12].copy_from_slice(&self.exp_length.to_le_bytes());
        out[12..16].copy_from_slice(&self.packet_number.to_le_bytes());
        out[16..24].copy_from_slice(&self.det_spec1.to_le_bytes());
        out[24..32].copy_from_slice(&self.timestamp.to_le_bytes());
        out[32..34].copy_from_slice(&self.mod_id.to_le_bytes());
        out[34..36].copy_from_slice(&self.row.to_le_bytes());
        out[36..38].copy_from_slice(&self.column.to_le_bytes());
        out[38..40].copy_from_slice(&self.reserved.to_le_bytes());
        out[40..44].copy_from_slice(&self.debug.to_le_bytes());
        out[44..46].copy_from_slice(&self.round_r_number.to_le_bytes());
        out[46] = self.det_type;
        out[47] = self.version;
        out
    }

    /// Bunch ID（`det_spec1` 字段）
    pub fn bunch_id(&self) -> u64 {
        self.det_spec1
    }

    /// 转换为引擎使用的 `FrameHeader`
    ///
    /// `memory_cell` 由具体探测器家族的解码器提取（见 `FrameDecoder::memory_cell`）。
    pub fn to_frame_header(&self, memory_cell: Option<u8>, arrival_time: f64) -> FrameHeader {
        FrameHeader::new(self.frame_number, self.det_spec1)
            .with_memory_cell(memory_cell)
            .with_arrival_time(arrival_time)
    }
}

/// 每帧元数据（值类型）
///
/// `correlation_id` 为 0 表示不可用；构造时全 1 哨兵值会被归一化为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameHeader {
    /// 硬件帧计数（单调递增）
    pub frame_number: u64,
    /// 外部 train/bunch ID，0 表示不可用
    pub correlation_id: u64,
    /// 存储单元索引（0-15），仅多存储单元探测器有效
    pub memory_cell: Option<u8>,
    /// 回调时刻的墙钟时间（秒）
    pub arrival_time: f64,
}

impl FrameHeader {
    pub fn new(frame_number: u64, correlation_id: u64) -> Self {
        let correlation_id = if correlation_id == CORRELATION_ID_SENTINEL {
            0
        } else {
            correlation_id
        };
        Self {
            frame_number,
            correlation_id,
            memory_cell: None,
            arrival_time: 0.0,
        }
    }

    pub fn with_memory_cell(mut self, memory_cell: Option<u8>) -> Self {
        self.memory_cell = memory_cell;
        self
    }

    pub fn with_arrival_time(mut self, arrival_time: f64) -> Self {
        self.arrival_time = arrival_time;
        self
    }

    /// 关联 ID 是否可用
    pub fn has_correlation_id(&self) -> bool {
        self.correlation_id != 0 && self.correlation_id != CORRELATION_ID_SENTINEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> DetectorHeader {
        DetectorHeader {
            frame_number: 0x0102_0304_0506_0708,
            exp_length: 7,
            packet_number: 2,
            det_spec1: 1_000_123,
            timestamp: 99,
            mod_id: 1,
            row: 2,
            column: 3,
            reserved: 0,
            debug: 0x0000_0A00,
            round_r_number: 5,
            det_type: 3,
            version: 1,
        }
    }

    #[test]
    fn test_detector_header_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), DETECTOR_HEADER_SIZE);
        assert_eq!(bytes[0], 0x08); // 小端
        assert_eq!(DetectorHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_detector_header_too_short() {
        let err = DetectorHeader::parse(&[0u8; 47]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 48,
                actual: 47
            }
        );
    }

    #[test]
    fn test_sentinel_normalized() {
        let header = FrameHeader::new(10, u64::MAX);
        assert_eq!(header.correlation_id, 0);
        assert!(!header.has_correlation_id());

        let header = FrameHeader::new(10, 0);
        assert!(!header.has_correlation_id());

        let header = FrameHeader::new(10, 42);
        assert!(header.has_correlation_id());
    }

    #[test]
    fn test_to_frame_header() {
        let frame = sample_header().to_frame_header(Some(10), 1.5);
        assert_eq!(frame.frame_number, 0x0102_0304_0506_0708);
        assert_eq!(frame.correlation_id, 1_000_123);
        assert_eq!(frame.memory_cell, Some(10));
        assert_eq!(frame.arrival_time, 1.5);
    }
}
