//! 在线显示抽帧
//!
//! 每个 train 中取出第 `frame_to_display` 帧，连同增益一起转发给显示线程。
//! 通道满时直接丢弃（显示只关心最新数据）。

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ndarray::Array2;
use slsrx_engine::{OutputSink, SinkError, TrainView};
use slsrx_protocol::AcquisitionEpoch;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// ADC 图像位深
pub const ADC_BIT_DEPTH: u8 = 14;

/// 增益图像位深
pub const GAIN_BIT_DEPTH: u8 = 2;

/// 显示数据
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayData {
    /// 一维探测器（条形）
    Vector { adc: Vec<u16>, gain: Vec<u8> },
    /// 二维探测器，形状为 `[rows, cols]`
    Image { adc: Array2<u16>, gain: Array2<u8> },
}

impl DisplayData {
    /// 按显示形状构造
    ///
    /// 超过两维的形状把除最后一维以外的维度合并为行。
    pub fn from_frame(
        display_shape: &[usize],
        adc: &[u16],
        gain: &[u8],
    ) -> Result<Self, SinkError> {
        match display_shape {
            [] | [_] => Ok(DisplayData::Vector {
                adc: adc.to_vec(),
                gain: gain.to_vec(),
            }),
            [leading @ .., cols] => {
                let rows = leading.iter().product::<usize>();
                Ok(DisplayData::Image {
                    adc: Array2::from_shape_vec((rows, *cols), adc.to_vec())?,
                    gain: Array2::from_shape_vec((rows, *cols), gain.to_vec())?,
                })
            },
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DisplayData::Image { .. })
    }

    pub fn adc_bit_depth(&self) -> u8 {
        ADC_BIT_DEPTH
    }

    pub fn gain_bit_depth(&self) -> u8 {
        GAIN_BIT_DEPTH
    }
}

/// 送往显示线程的一帧
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub epoch: AcquisitionEpoch,
    pub sequence: u64,
    pub frame_number: u64,
    pub correlation_id: u64,
    pub data: DisplayData,
}

/// 显示输出端
pub struct DisplaySink {
    frame_to_display: usize,
    tx: Sender<DisplayFrame>,
    dropped: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl DisplaySink {
    /// 创建显示输出端
    ///
    /// # 参数
    ///
    /// - `frame_to_display`: 每个 train 中要显示的帧序号
    /// - `capacity`: 通道容量（至少 1）
    pub fn new(frame_to_display: usize, capacity: usize) -> (Self, Receiver<DisplayFrame>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                frame_to_display,
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                skipped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn frame_to_display(&self) -> usize {
        self.frame_to_display
    }

    /// 通道满而丢弃的帧数
    pub fn dropped(&self) -> &Arc<AtomicU64> {
        &self.dropped
    }

    /// train 帧数不足而跳过的 train 数
    pub fn skipped(&self) -> &Arc<AtomicU64> {
        &self.skipped
    }
}

impl OutputSink for DisplaySink {
    fn name(&self) -> &str {
        "display"
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        let index = self.frame_to_display;
        let (Some(adc), Some(gain)) = (train.frame_adc(index), train.frame_gain(index)) else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let frame = DisplayFrame {
            epoch: train.epoch(),
            sequence: train.sequence(),
            frame_number: train.frame_number()[index],
            correlation_id: train.correlation_id()[index],
            data: DisplayData::from_frame(train.display_shape(), adc, gain)?,
        };

        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!("Display channel full, frame dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Disconnected("display".into())),
        }
    }
}
