//! 输出端接口
//!
//! 发布线程把每个完成的 train 以 [`TrainView`] 的形式借给所有输出端，
//! 借用只在一次同步 `publish()` 调用期间有效；调用返回后缓冲区被复位并归还到池中。
//! 需要把数据交给其他线程的输出端应调用 [`TrainView::to_owned`] 深拷贝。
//!
//! # 形状
//!
//! - display 形状：`[frames, ...display_shape]`，例如 Jungfrau 为 `[frames, 512, 1024]`
//! - columnar 形状：display 形状的轴逆序，帧轴在最后，例如 `[1024, 512, frames]`，
//!   与 display 共享同一块内存（步长视图，无拷贝）

use crate::train_buffer::TrainBuffer;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ndarray::{ArrayViewD, IxDyn, ShapeError};
use serde::{Deserialize, Serialize};
use slsrx_protocol::{AcquisitionEpoch, Shape};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// 结束信号在通道满时的最长等待时间
const END_OF_STREAM_TIMEOUT: Duration = Duration::from_secs(1);

/// 输出端错误类型
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consumer disconnected: {0}")]
    Disconnected(String),
}

/// 借出的 train 视图（只读）
#[derive(Debug, Clone, Copy)]
pub struct TrainView<'a> {
    epoch: AcquisitionEpoch,
    sequence: u64,
    display_shape: &'a [usize],
    buffer: &'a TrainBuffer,
}

impl<'a> TrainView<'a> {
    pub fn new(
        epoch: AcquisitionEpoch,
        sequence: u64,
        display_shape: &'a [usize],
        buffer: &'a TrainBuffer,
    ) -> Self {
        Self {
            epoch,
            sequence,
            display_shape,
            buffer,
        }
    }

    pub fn epoch(&self) -> AcquisitionEpoch {
        self.epoch
    }

    /// 本次采集中的 train 序号（从 0 开始）
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frames(&self) -> usize {
        self.buffer.accumulated_frames()
    }

    pub fn detector_size(&self) -> usize {
        self.buffer.detector_size()
    }

    pub fn display_shape(&self) -> &'a [usize] {
        self.display_shape
    }

    /// `[frames, ...display_shape]`
    pub fn pipeline_shape(&self) -> Shape {
        let mut shape = Shape::new();
        shape.push(self.frames());
        shape.extend_from_slice(self.display_shape);
        shape
    }

    /// `[...display_shape reversed, frames]`
    pub fn daq_shape(&self) -> Shape {
        let mut shape: Shape = self.display_shape.iter().rev().copied().collect();
        shape.push(self.frames());
        shape
    }

    pub fn adc(&self) -> &'a [u16] {
        self.buffer.adc()
    }

    pub fn gain(&self) -> &'a [u8] {
        self.buffer.gain()
    }

    pub fn memory_cell(&self) -> &'a [u8] {
        self.buffer.memory_cells()
    }

    pub fn frame_number(&self) -> &'a [u64] {
        self.buffer.frame_numbers()
    }

    pub fn correlation_id(&self) -> &'a [u64] {
        self.buffer.correlation_ids()
    }

    pub fn timestamp(&self) -> &'a [f64] {
        self.buffer.timestamps()
    }

    pub fn last_correlation_id(&self) -> u64 {
        self.buffer.last_correlation_id()
    }

    pub fn last_timestamp(&self) -> f64 {
        self.buffer.last_timestamp()
    }

    /// ADC 数据的 display 视图
    pub fn adc_display(&self) -> Result<ArrayViewD<'a, u16>, SinkError> {
        Ok(ArrayViewD::from_shape(
            IxDyn(&self.pipeline_shape()),
            self.adc(),
        )?)
    }

    /// 增益数据的 display 视图
    pub fn gain_display(&self) -> Result<ArrayViewD<'a, u8>, SinkError> {
        Ok(ArrayViewD::from_shape(
            IxDyn(&self.pipeline_shape()),
            self.gain(),
        )?)
    }

    /// ADC 数据的 columnar 视图（帧轴在最后，无拷贝）
    pub fn adc_columnar(&self) -> Result<ArrayViewD<'a, u16>, SinkError> {
        Ok(self.adc_display()?.reversed_axes())
    }

    /// 增益数据的 columnar 视图
    pub fn gain_columnar(&self) -> Result<ArrayViewD<'a, u8>, SinkError> {
        Ok(self.gain_display()?.reversed_axes())
    }

    /// 第 `index` 帧的 ADC 数据（越界返回 None）
    pub fn frame_adc(&self, index: usize) -> Option<&'a [u16]> {
        frame_slice(self.adc(), self.detector_size(), index)
    }

    pub fn frame_gain(&self, index: usize) -> Option<&'a [u8]> {
        frame_slice(self.gain(), self.detector_size(), index)
    }

    /// 深拷贝为 [`OwnedTrain`]
    pub fn to_owned(&self) -> OwnedTrain {
        OwnedTrain {
            epoch: self.epoch,
            sequence: self.sequence,
            display_shape: self.display_shape.to_vec(),
            adc: self.adc().to_vec(),
            gain: self.gain().to_vec(),
            memory_cell: self.memory_cell().to_vec(),
            frame_number: self.frame_number().to_vec(),
            correlation_id: self.correlation_id().to_vec(),
            timestamp: self.timestamp().to_vec(),
            last_correlation_id: self.last_correlation_id(),
            last_timestamp: self.last_timestamp(),
        }
    }
}

fn frame_slice<T>(data: &[T], detector_size: usize, index: usize) -> Option<&[T]> {
    let start = index.checked_mul(detector_size)?;
    data.get(start..start + detector_size)
}

/// 拥有所有权的 train（深拷贝，可跨线程、可序列化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedTrain {
    pub epoch: AcquisitionEpoch,
    pub sequence: u64,
    pub display_shape: Vec<usize>,
    pub adc: Vec<u16>,
    pub gain: Vec<u8>,
    pub memory_cell: Vec<u8>,
    pub frame_number: Vec<u64>,
    pub correlation_id: Vec<u64>,
    pub timestamp: Vec<f64>,
    pub last_correlation_id: u64,
    pub last_timestamp: f64,
}

impl OwnedTrain {
    pub fn frames(&self) -> usize {
        self.frame_number.len()
    }

    pub fn detector_size(&self) -> usize {
        self.display_shape.iter().product()
    }

    pub fn frame_adc(&self, index: usize) -> Option<&[u16]> {
        frame_slice(&self.adc, self.detector_size(), index)
    }

    pub fn frame_gain(&self, index: usize) -> Option<&[u8]> {
        frame_slice(&self.gain, self.detector_size(), index)
    }

    /// 以借用视图重新解释（形状与 [`TrainView::adc_display`] 相同）
    pub fn adc_display(&self) -> Result<ArrayViewD<'_, u16>, SinkError> {
        let mut shape = vec![self.frames()];
        shape.extend_from_slice(&self.display_shape);
        Ok(ArrayViewD::from_shape(IxDyn(&shape), &self.adc[..])?)
    }
}

/// 输出端
///
/// `publish` 在发布线程上同步执行，按 train 边界检测的顺序调用；
/// 可以执行 IO，耗时不会阻塞采集线程（只会在积压时触发有界等待）。
///
/// # 示例
///
/// ```rust
/// use slsrx_engine::{OutputSink, SinkError, TrainView};
///
/// struct CountingSink(u64);
///
/// impl OutputSink for CountingSink {
///     fn name(&self) -> &str {
///         "counting"
///     }
///
///     fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
///         self.0 += train.frames() as u64;
///         Ok(())
///     }
/// }
/// ```
pub trait OutputSink: Send {
    /// 输出端名称（用于日志）
    fn name(&self) -> &str;

    /// 发布一个 train
    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError>;

    /// 采集结束信号（每次采集恰好一次，在该采集的最后一个 train 之后）
    fn end_of_stream(&mut self, _epoch: AcquisitionEpoch) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 输出端集合
///
/// 一个输出端失败不影响其他输出端。
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// 发布到所有输出端，返回失败的输出端数量
    pub fn publish_all(&mut self, train: &TrainView<'_>) -> u64 {
        let mut errors = 0;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.publish(train) {
                warn!(
                    "Sink '{}' failed to publish train {} of acquisition {}: {}",
                    sink.name(),
                    train.sequence(),
                    train.epoch(),
                    e
                );
                errors += 1;
            }
        }
        errors
    }

    /// 向所有输出端发送结束信号，返回失败的输出端数量
    pub fn end_of_stream_all(&mut self, epoch: AcquisitionEpoch) -> u64 {
        let mut errors = 0;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.end_of_stream(epoch) {
                warn!(
                    "Sink '{}' failed to handle end of stream for acquisition {}: {}",
                    sink.name(),
                    epoch,
                    e
                );
                errors += 1;
            }
        }
        errors
    }
}

/// 通道输出端事件
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Train(OwnedTrain),
    EndOfStream(AcquisitionEpoch),
}

/// 把 train 深拷贝后转发到有界通道的输出端
///
/// 通道满时丢弃 train（`try_send`，不阻塞发布线程），通过 `dropped_trains` 计数。
/// 结束信号最多等待 1 秒。
///
/// # 示例
///
/// ```rust
/// use slsrx_engine::ChannelSink;
///
/// let (sink, rx) = ChannelSink::new("consumer", 16);
/// let dropped = sink.dropped_trains().clone();
///
/// std::thread::spawn(move || {
///     while let Ok(event) = rx.recv() {
///         // 处理 train...
///         let _ = event;
///     }
/// });
///
/// assert_eq!(dropped.load(std::sync::atomic::Ordering::Relaxed), 0);
/// ```
pub struct ChannelSink {
    name: String,
    tx: Sender<SinkEvent>,
    dropped_trains: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
                dropped_trains: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// 通道满而丢弃的 train 数
    pub fn dropped_trains(&self) -> &Arc<AtomicU64> {
        &self.dropped_trains
    }
}

impl OutputSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        match self.tx.try_send(SinkEvent::Train(train.to_owned())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_trains.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Disconnected(self.name.clone())),
        }
    }

    fn end_of_stream(&mut self, epoch: AcquisitionEpoch) -> Result<(), SinkError> {
        self.tx
            .send_timeout(SinkEvent::EndOfStream(epoch), END_OF_STREAM_TIMEOUT)
            .map_err(|_| SinkError::Disconnected(self.name.clone()))
    }
}
