//! Train 累积缓冲区
//!
//! 一块固定容量的缓冲区，保存最多 `frames_per_train` 帧解码后的 ADC/增益数据，
//! 以及每帧的元数据（帧号、关联 ID、时间戳、存储单元）。
//!
//! # 不变量
//!
//! - `accumulated_frames <= capacity_frames`
//! - 第 `i` 个槽位只在 `accumulated_frames == i` 时被写入（追加式），
//!   在 `reset()` 之前不会被再次写入
//!
//! 违反前置条件属于编程错误，直接 panic。

use slsrx_protocol::{FrameDecoder, FrameHeader, ProtocolError};

/// 无存储单元信息时写入的占位值
pub const NO_MEMORY_CELL: u8 = 255;

/// Train 累积缓冲区
#[derive(Debug, Clone)]
pub struct TrainBuffer {
    adc: Vec<u16>,
    gain: Vec<u8>,
    memory_cell: Vec<u8>,
    frame_number: Vec<u64>,
    correlation_id: Vec<u64>,
    timestamp: Vec<f64>,
    accumulated_frames: usize,
    last_correlation_id: u64,
    last_timestamp: f64,
    detector_size: usize,
    capacity_frames: usize,
}

impl TrainBuffer {
    /// 分配缓冲区
    ///
    /// # 参数
    ///
    /// - `detector_size`: 单帧像素数
    /// - `frames_per_train`: 帧容量
    pub fn new(detector_size: usize, frames_per_train: usize) -> Self {
        let size = detector_size * frames_per_train;
        Self {
            adc: vec![0; size],
            gain: vec![0; size],
            memory_cell: Vec::with_capacity(frames_per_train),
            frame_number: Vec::with_capacity(frames_per_train),
            correlation_id: Vec::with_capacity(frames_per_train),
            timestamp: Vec::with_capacity(frames_per_train),
            accumulated_frames: 0,
            last_correlation_id: 0,
            last_timestamp: 0.0,
            detector_size,
            capacity_frames: frames_per_train,
        }
    }

    /// 清空累积状态
    ///
    /// 不释放、不重新分配内存，也不清零像素数组（只有 `accumulated_frames`
    /// 之前的槽位是有效数据）。
    pub fn reset(&mut self) {
        self.accumulated_frames = 0;
        self.memory_cell.clear();
        self.frame_number.clear();
        self.correlation_id.clear();
        self.timestamp.clear();
        self.last_correlation_id = 0;
        self.last_timestamp = 0.0;
    }

    /// 重新分配到新容量
    ///
    /// 只能在缓冲区未被使用时调用（采集开始、第一帧到达之前）。
    pub fn resize(&mut self, detector_size: usize, frames_per_train: usize) {
        if detector_size != self.detector_size || frames_per_train != self.capacity_frames {
            *self = Self::new(detector_size, frames_per_train);
        } else {
            self.reset();
        }
    }

    /// 把一帧已解码数据写入槽位 `slot`
    ///
    /// # Panics
    ///
    /// - `slot >= capacity_frames` 或缓冲区已满
    /// - `slot != accumulated_frames`（会覆盖已有数据或留下空洞）
    /// - 源切片长度不等于 `detector_size`
    pub fn write_frame(&mut self, slot: usize, adc: &[u16], gain: &[u8], header: &FrameHeader) {
        assert!(
            slot < self.capacity_frames,
            "slot {} out of capacity {}",
            slot,
            self.capacity_frames
        );
        assert!(
            self.accumulated_frames < self.capacity_frames,
            "write_frame on a full buffer ({} frames)",
            self.capacity_frames
        );
        assert_eq!(
            slot, self.accumulated_frames,
            "slot {} is not the next free slot",
            slot
        );
        assert_eq!(adc.len(), self.detector_size, "adc frame size mismatch");
        assert_eq!(gain.len(), self.detector_size, "gain frame size mismatch");

        let range = self.slot_range(slot);
        self.adc[range.clone()].copy_from_slice(adc);
        self.gain[range].copy_from_slice(gain);
        self.commit_slot(header);
    }

    /// 把 `raw` 中第 `index` 帧直接解码到下一个空闲槽位
    ///
    /// 解码失败时 `accumulated_frames` 不变，该槽位视为未写入。
    ///
    /// # Panics
    ///
    /// 缓冲区已满时调用（调用方必须先检查 `is_full()`）。
    pub fn decode_into_next(
        &mut self,
        decoder: &dyn FrameDecoder,
        raw: &[u8],
        index: usize,
        header: &FrameHeader,
    ) -> Result<usize, ProtocolError> {
        assert!(
            self.accumulated_frames < self.capacity_frames,
            "decode_into_next on a full buffer ({} frames)",
            self.capacity_frames
        );

        let slot = self.accumulated_frames;
        let range = self.slot_range(slot);
        decoder.decode(raw, index, &mut self.adc[range.clone()], &mut self.gain[range])?;
        self.commit_slot(header);
        Ok(slot)
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        slot * self.detector_size..(slot + 1) * self.detector_size
    }

    fn commit_slot(&mut self, header: &FrameHeader) {
        self.memory_cell
            .push(header.memory_cell.unwrap_or(NO_MEMORY_CELL));
        self.frame_number.push(header.frame_number);
        self.correlation_id.push(header.correlation_id);
        self.timestamp.push(header.arrival_time);
        self.last_correlation_id = header.correlation_id;
        self.last_timestamp = header.arrival_time;
        self.accumulated_frames += 1;
    }

    pub fn accumulated_frames(&self) -> usize {
        self.accumulated_frames
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn detector_size(&self) -> usize {
        self.detector_size
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated_frames == 0
    }

    pub fn is_full(&self) -> bool {
        self.accumulated_frames >= self.capacity_frames
    }

    /// 最近写入帧的关联 ID（用于下一帧的边界判定）
    pub fn last_correlation_id(&self) -> u64 {
        self.last_correlation_id
    }

    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    /// 已累积帧的 ADC 数据（`accumulated_frames × detector_size`）
    pub fn adc(&self) -> &[u16] {
        &self.adc[..self.accumulated_frames * self.detector_size]
    }

    /// 已累积帧的增益数据
    pub fn gain(&self) -> &[u8] {
        &self.gain[..self.accumulated_frames * self.detector_size]
    }

    pub fn memory_cells(&self) -> &[u8] {
        &self.memory_cell
    }

    pub fn frame_numbers(&self) -> &[u64] {
        &self.frame_number
    }

    pub fn correlation_ids(&self) -> &[u64] {
        &self.correlation_id
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamp
    }
}
