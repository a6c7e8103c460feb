//! 帧解码器
//!
//! 按探测器家族把原始帧（小端 u16 字）拆分为 ADC 和增益两个数组。
//! 引擎只通过 [`FrameDecoder`] trait 使用解码器，不依赖具体的位布局。

use crate::detector::DetectorType;
use crate::header::DetectorHeader;
use crate::{ProtocolError, Shape};
use smallvec::smallvec;

/// Jungfrau 模块宽度（像素）
pub const JUNGFRAU_PIXEL_X: usize = 4 * 256;
/// Jungfrau 模块高度（像素）
pub const JUNGFRAU_PIXEL_Y: usize = 2 * 256;
/// Gotthard / Gotthard2 通道数
pub const GOTTHARD_CHANNELS: usize = 1280;

/// 帧解码能力（按探测器家族注入）
///
/// # 线程安全
///
/// 解码器在生产者回调线程中被调用，必须是 `Send + Sync` 的纯函数式实现。
///
/// # 示例
///
/// ```rust
/// use slsrx_protocol::{FrameDecoder, MaskedDecoder};
///
/// let decoder = MaskedDecoder::gotthard();
/// assert_eq!(decoder.detector_size(), 1280);
/// assert_eq!(decoder.frame_bytes(), 2560);
/// assert_eq!(decoder.daq_shape(10).as_slice(), &[1280, 10]);
/// ```
pub trait FrameDecoder: Send + Sync {
    /// 探测器类型
    fn detector_type(&self) -> DetectorType;

    /// 单帧显示形状（如 `[Y, X]` 或 `[channels]`）
    fn display_shape(&self) -> Shape;

    /// 单帧像素数
    fn detector_size(&self) -> usize {
        self.display_shape().iter().product()
    }

    /// 单帧原始字节数（每像素一个 u16 字）
    fn frame_bytes(&self) -> usize {
        self.detector_size() * std::mem::size_of::<u16>()
    }

    /// 列存储（DAQ）形状：显示形状逆序，最后一维为帧
    fn daq_shape(&self, frames_per_train: usize) -> Shape {
        let mut shape: Shape = self.display_shape().iter().rev().copied().collect();
        shape.push(frames_per_train);
        shape
    }

    /// 解码 `raw` 中第 `index` 帧，写入 `adc` 和 `gain`
    ///
    /// # 参数
    ///
    /// - `raw`: 回调传入的原始负载（可能包含多帧）
    /// - `index`: 负载中的帧序号
    /// - `adc`, `gain`: 目标切片，长度必须等于 `detector_size()`
    ///
    /// # 错误
    ///
    /// 负载不足或目标切片长度不符时返回错误；调用方应跳过该帧。
    fn decode(
        &self,
        raw: &[u8],
        index: usize,
        adc: &mut [u16],
        gain: &mut [u8],
    ) -> Result<(), ProtocolError>;

    /// 从原始帧头提取存储单元索引（默认：不支持）
    fn memory_cell(&self, header: &DetectorHeader) -> Option<u8> {
        let _ = header;
        None
    }
}

/// 基于掩码的解码器
///
/// 每个 u16 字低位是 ADC，高位是增益：
///
/// ```text
/// adc  = word & adc_mask
/// gain = (word & gain_mask) >> gain_shift
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedDecoder {
    detector_type: DetectorType,
    display_shape: Shape,
    detector_size: usize,
    adc_mask: u16,
    gain_mask: u16,
    gain_shift: u8,
    /// 存储单元编码在 debug 字段 bit 11..8
    memory_cell_in_debug: bool,
}

impl MaskedDecoder {
    /// 自定义解码器
    ///
    /// # 错误
    ///
    /// 形状为空或包含 0 维时返回 `ProtocolError::InvalidShape`。
    pub fn new(
        detector_type: DetectorType,
        display_shape: &[usize],
        adc_mask: u16,
        gain_mask: u16,
        gain_shift: u8,
    ) -> Result<Self, ProtocolError> {
        if display_shape.is_empty() || display_shape.contains(&0) {
            return Err(ProtocolError::InvalidShape(format!("{:?}", display_shape)));
        }
        if gain_shift >= 16 {
            return Err(ProtocolError::InvalidShape(format!(
                "gain shift {} exceeds word width",
                gain_shift
            )));
        }
        Ok(Self {
            detector_type,
            display_shape: display_shape.iter().copied().collect(),
            detector_size: display_shape.iter().product(),
            adc_mask,
            gain_mask,
            gain_shift,
            memory_cell_in_debug: false,
        })
    }

    /// Jungfrau：1024×512 像素，14 位 ADC，2 位增益，16 个存储单元
    pub fn jungfrau() -> Self {
        Self {
            detector_type: DetectorType::Jungfrau,
            display_shape: smallvec![JUNGFRAU_PIXEL_Y, JUNGFRAU_PIXEL_X],
            detector_size: JUNGFRAU_PIXEL_X * JUNGFRAU_PIXEL_Y,
            adc_mask: 0x3FFF,
            gain_mask: 0xC000,
            gain_shift: 14,
            memory_cell_in_debug: true,
        }
    }

    /// Gotthard：1280 通道，14 位 ADC，2 位增益
    pub fn gotthard() -> Self {
        Self {
            detector_type: DetectorType::Gotthard,
            display_shape: smallvec![GOTTHARD_CHANNELS],
            detector_size: GOTTHARD_CHANNELS,
            adc_mask: 0x3FFF,
            gain_mask: 0xC000,
            gain_shift: 14,
            memory_cell_in_debug: false,
        }
    }

    /// Gotthard2：1280 通道，12 位 ADC，2 位增益
    pub fn gotthard2() -> Self {
        Self {
            detector_type: DetectorType::Gotthard2,
            display_shape: smallvec![GOTTHARD_CHANNELS],
            detector_size: GOTTHARD_CHANNELS,
            adc_mask: 0x0FFF,
            gain_mask: 0x3000,
            gain_shift: 12,
            memory_cell_in_debug: false,
        }
    }

    /// 按探测器类型选择内置解码器
    pub fn for_detector(detector_type: DetectorType) -> Option<Self> {
        match detector_type {
            DetectorType::Jungfrau => Some(Self::jungfrau()),
            DetectorType::Gotthard => Some(Self::gotthard()),
            DetectorType::Gotthard2 => Some(Self::gotthard2()),
            _ => None,
        }
    }

    pub fn adc_mask(&self) -> u16 {
        self.adc_mask
    }

    pub fn gain_shift(&self) -> u8 {
        self.gain_shift
    }
}

impl FrameDecoder for MaskedDecoder {
    fn detector_type(&self) -> DetectorType {
        self.detector_type
    }

    fn display_shape(&self) -> Shape {
        self.display_shape.clone()
    }

    fn detector_size(&self) -> usize {
        self.detector_size
    }

    fn decode(
        &self,
        raw: &[u8],
        index: usize,
        adc: &mut [u16],
        gain: &mut [u8],
    ) -> Result<(), ProtocolError> {
        let frame_bytes = self.frame_bytes();
        let frames = raw.len() / frame_bytes;
        if index >= frames {
            return Err(ProtocolError::FrameIndexOutOfRange { index, frames });
        }
        if adc.len() != self.detector_size {
            return Err(ProtocolError::InvalidLength {
                expected: self.detector_size,
                actual: adc.len(),
            });
        }
        if gain.len() != self.detector_size {
            return Err(ProtocolError::InvalidLength {
                expected: self.detector_size,
                actual: gain.len(),
            });
        }

        let start = index * frame_bytes;
        let words = raw[start..start + frame_bytes].chunks_exact(2);
        for ((word, adc), gain) in words.zip(adc.iter_mut()).zip(gain.iter_mut()) {
            let word = u16::from_le_bytes([word[0], word[1]]);
            *adc = word & self.adc_mask;
            *gain = ((word & self.gain_mask) >> self.gain_shift) as u8;
        }
        Ok(())
    }

    fn memory_cell(&self, header: &DetectorHeader) -> Option<u8> {
        if self.memory_cell_in_debug {
            Some(((header.debug >> 8) & 0xF) as u8)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pack(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_builtin_shapes() {
        let jf = MaskedDecoder::jungfrau();
        assert_eq!(jf.detector_size(), 1024 * 512);
        assert_eq!(jf.display_shape().as_slice(), &[512, 1024]);
        assert_eq!(jf.daq_shape(16).as_slice(), &[1024, 512, 16]);

        let g2 = MaskedDecoder::gotthard2();
        assert_eq!(g2.display_shape().as_slice(), &[1280]);
        assert_eq!(g2.daq_shape(3).as_slice(), &[1280, 3]);
    }

    #[test]
    fn test_decode_gotthard_word() {
        let decoder = MaskedDecoder::new(DetectorType::Gotthard, &[2], 0x3FFF, 0xC000, 14).unwrap();
        let raw = pack(&[0xC123, 0x4FFF]);
        let mut adc = [0u16; 2];
        let mut gain = [0u8; 2];
        decoder.decode(&raw, 0, &mut adc, &mut gain).unwrap();
        assert_eq!(adc, [0x0123, 0x0FFF]);
        assert_eq!(gain, [3, 1]);
    }

    #[test]
    fn test_decode_gotthard2_word() {
        let decoder =
            MaskedDecoder::new(DetectorType::Gotthard2, &[1], 0x0FFF, 0x3000, 12).unwrap();
        let raw = pack(&[0x2ABC]);
        let mut adc = [0u16; 1];
        let mut gain = [0u8; 1];
        decoder.decode(&raw, 0, &mut adc, &mut gain).unwrap();
        assert_eq!(adc, [0x0ABC]);
        assert_eq!(gain, [2]);
    }

    #[test]
    fn test_decode_second_frame_in_payload() {
        let decoder = MaskedDecoder::new(DetectorType::Generic, &[2], 0x3FFF, 0xC000, 14).unwrap();
        let raw = pack(&[1, 2, 3, 4]);
        let mut adc = [0u16; 2];
        let mut gain = [0u8; 2];
        decoder.decode(&raw, 1, &mut adc, &mut gain).unwrap();
        assert_eq!(adc, [3, 4]);

        let err = decoder.decode(&raw, 2, &mut adc, &mut gain).unwrap_err();
        assert_eq!(err, ProtocolError::FrameIndexOutOfRange { index: 2, frames: 2 });
    }

    #[test]
    fn test_decode_rejects_wrong_destination() {
        let decoder = MaskedDecoder::new(DetectorType::Generic, &[4], 0x3FFF, 0xC000, 14).unwrap();
        let raw = pack(&[0; 4]);
        let mut adc = [0u16; 3];
        let mut gain = [0u8; 4];
        assert!(decoder.decode(&raw, 0, &mut adc, &mut gain).is_err());
    }

    #[test]
    fn test_invalid_shape() {
        assert!(MaskedDecoder::new(DetectorType::Generic, &[], 0xFFFF, 0, 0).is_err());
        assert!(MaskedDecoder::new(DetectorType::Generic, &[4, 0], 0xFFFF, 0, 0).is_err());
        assert!(MaskedDecoder::new(DetectorType::Generic, &[4], 0xFFFF, 0, 16).is_err());
    }

    #[test]
    fn test_memory_cell_from_debug() {
        let header = DetectorHeader {
            debug: 0x0000_0F00 | 0x0000_3000,
            ..Default::default()
        };
        assert_eq!(MaskedDecoder::jungfrau().memory_cell(&header), Some(15));
        assert_eq!(MaskedDecoder::gotthard().memory_cell(&header), None);
    }

    #[test]
    fn test_for_detector() {
        assert!(MaskedDecoder::for_detector(DetectorType::Jungfrau).is_some());
        assert!(MaskedDecoder::for_detector(DetectorType::Eiger).is_none());
    }

    proptest! {
        #[test]
        fn prop_masks_partition_word(word in any::<u16>()) {
            let decoder = MaskedDecoder::gotthard();
            let mut raw = vec![0u8; decoder.frame_bytes()];
            raw[0..2].copy_from_slice(&word.to_le_bytes());
            let mut adc = vec![0u16; decoder.detector_size()];
            let mut gain = vec![0u8; decoder.detector_size()];
            decoder.decode(&raw, 0, &mut adc, &mut gain).unwrap();
            prop_assert_eq!(adc[0] | ((gain[0] as u16) << 14), word);
        }
    }
}
