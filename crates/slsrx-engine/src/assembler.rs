//! Train 组装器
//!
//! 采集库的三个回调（开始 / 帧就绪 / 停止）都进入这里。组装器持有当前的活动缓冲区，
//! 按边界判定把帧写入其中，train 完成时从 [`BufferPool`] 换出一块空闲缓冲区，
//! 并把已完成的缓冲区按所有权转移给发布线程。
//!
//! # 状态机
//!
//! ```text
//! Idle ──start──▶ Accumulating ──stop──▶ Draining ──(flush + 结束信号)──▶ Idle
//! ```
//!
//! # 边界判定
//!
//! 一帧开始新的 train，当且仅当：
//! - burst 模式下 `memory_cell == storage_cell_start`，或
//! - 关联 ID 模式下 `correlation_id > active.last_correlation_id`，或
//! - 关联 ID 不可用且活动缓冲区已满（计数回退）
//!
//! 且活动缓冲区非空。计数回退把“没有 ID”与“缓冲区已满”视为同一条件。

use crate::config::AssemblerConfig;
use crate::error::EngineError;
use crate::limited_warn;
use crate::metrics::EngineMetrics;
use crate::pool::BufferPool;
use crate::publisher::PublisherMessage;
use crate::rate::{RateSnapshot, RateTracker};
use crate::train_buffer::TrainBuffer;
use crate::warn_limit::WarnLimiter;
use arc_swap::ArcSwap;
use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::Mutex;
use slsrx_protocol::{
    AcquisitionEpoch, AcquisitionParams, FrameDecoder, FrameHeader, MAX_STORAGE_CELL,
};
use slsrx_source::{AcquisitionHandler, SourceError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

/// 停止时冲刷最后一个 train、发送结束信号的最长等待时间
const STOP_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// 组装器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AssemblerState {
    Idle = 0,
    Accumulating = 1,
    Draining = 2,
}

impl AssemblerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AssemblerState::Accumulating,
            2 => AssemblerState::Draining,
            _ => AssemblerState::Idle,
        }
    }
}

/// Train 边界信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryMode {
    /// 关联 ID 递增开始新 train（ID 不可用时按计数回退）
    CorrelationId,
    /// 存储单元回到起始单元时开始新 train（burst 模式）
    MemoryCell { storage_cell_start: u8 },
}

impl BoundaryMode {
    pub fn from_params(params: &AcquisitionParams) -> Self {
        if params.burst_mode {
            BoundaryMode::MemoryCell {
                storage_cell_start: params.storage_cell_start,
            }
        } else {
            BoundaryMode::CorrelationId
        }
    }
}

/// 帧回调被整体拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 当前没有处于累积状态的采集
    NotAccumulating(AssemblerState),
    /// 回调携带的纪元与当前采集不一致
    StaleEpoch {
        expected: AcquisitionEpoch,
        got: AcquisitionEpoch,
    },
    /// 字节数不是单帧字节数的正整数倍
    Malformed { byte_count: usize, frame_bytes: usize },
}

/// 一次帧回调的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    /// 写入缓冲区的帧数
    pub written: usize,
    /// 缓冲区已满而丢弃的帧数
    pub dropped_overflow: usize,
    /// 解码失败而跳过的帧数
    pub decode_failed: usize,
    /// 交给发布线程的 train 数
    pub trains_handed_off: usize,
    /// 背压丢弃的 train 数
    pub trains_dropped: usize,
}

/// 帧回调结果
///
/// 帧路径上的所有情况都是可恢复的，不以错误返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(IngestReport),
    Rejected(RejectReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }

    pub fn report(&self) -> Option<&IngestReport> {
        match self {
            IngestOutcome::Accepted(report) => Some(report),
            IngestOutcome::Rejected(_) => None,
        }
    }
}

/// 一次采集的生产者侧状态
struct Acquisition {
    epoch: AcquisitionEpoch,
    params: AcquisitionParams,
    boundary: BoundaryMode,
    active: TrainBuffer,
    pool: BufferPool,
    next_sequence: u64,
    rate: RateTracker,
    warnings: WarnLimiter,
    frames_received: u64,
    trains_handed_off: u64,
}

impl Acquisition {
    fn is_new_train(&self, header: &FrameHeader) -> bool {
        let marker = match self.boundary {
            BoundaryMode::MemoryCell { storage_cell_start } => {
                header.memory_cell == Some(storage_cell_start)
            },
            BoundaryMode::CorrelationId => {
                header.has_correlation_id()
                    && header.correlation_id > self.active.last_correlation_id()
            },
        };
        let counting_cutoff = !header.has_correlation_id()
            && self.active.accumulated_frames() >= self.params.frames_per_train;

        marker || counting_cutoff
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

#[derive(Default)]
struct ProducerState {
    acquisition: Option<Acquisition>,
    /// 上一次采集的缓冲池（下一次采集复用其缓冲区）
    last_pool: Option<BufferPool>,
}

/// Train 组装器
///
/// 三个回调可以来自不同线程；生产者侧状态由一把互斥锁串行化，
/// 状态和纪元另有原子副本供无锁读取。
pub struct TrainAssembler {
    decoder: Arc<dyn FrameDecoder>,
    config: AssemblerConfig,
    producer: Mutex<ProducerState>,
    phase: AtomicU8,
    epoch: AtomicU64,
    publish_tx: Sender<PublisherMessage>,
    metrics: Arc<EngineMetrics>,
    rates: Arc<ArcSwap<RateSnapshot>>,
}

impl TrainAssembler {
    /// 创建组装器
    ///
    /// # 参数
    ///
    /// - `decoder`: 探测器家族的解码器
    /// - `config`: 组装器配置
    /// - `publish_tx`: 发布队列发送端
    /// - `metrics`: 共享指标
    pub fn new(
        decoder: Arc<dyn FrameDecoder>,
        config: AssemblerConfig,
        publish_tx: Sender<PublisherMessage>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            decoder,
            config,
            producer: Mutex::new(ProducerState::default()),
            phase: AtomicU8::new(AssemblerState::Idle as u8),
            epoch: AtomicU64::new(0),
            publish_tx,
            metrics,
            rates: Arc::new(ArcSwap::from_pointee(RateSnapshot::default())),
        }
    }

    pub fn state(&self) -> AssemblerState {
        AssemblerState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_state(&self, state: AssemblerState) {
        self.phase.store(state as u8, Ordering::Release);
    }

    /// 最近一次采集的纪元（尚未开始过采集时为 `#0`）
    pub fn current_epoch(&self) -> AcquisitionEpoch {
        AcquisitionEpoch(self.epoch.load(Ordering::Acquire))
    }

    pub fn decoder(&self) -> &Arc<dyn FrameDecoder> {
        &self.decoder
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// 最新帧率样本（无锁读取）
    pub fn rates(&self) -> RateSnapshot {
        **self.rates.load()
    }

    /// 活动缓冲区中的帧数（无采集时为 None）
    pub fn active_frames(&self) -> Option<usize> {
        self.producer
            .lock()
            .acquisition
            .as_ref()
            .map(|acq| acq.active.accumulated_frames())
    }

    /// 采集开始
    ///
    /// 分配（或复用上次采集的）两块缓冲区，重置帧率和警告计数，进入 `Accumulating`。
    ///
    /// # 错误
    ///
    /// - `frames_per_train == 0` 或 burst 模式起始存储单元超过 15: [`EngineError::InvalidConfig`]
    /// - 像素数与解码器不一致: [`EngineError::DetectorSizeMismatch`]
    /// - 已有采集在进行: [`EngineError::AcquisitionActive`]
    pub fn start_acquisition(
        &self,
        params: &AcquisitionParams,
    ) -> Result<AcquisitionEpoch, EngineError> {
        if params.frames_per_train == 0 {
            return Err(EngineError::InvalidConfig(
                "frames_per_train must be > 0".to_string(),
            ));
        }
        if params.burst_mode && params.storage_cell_start > MAX_STORAGE_CELL {
            return Err(EngineError::InvalidConfig(format!(
                "storage_cell_start {} exceeds the last storage cell {}",
                params.storage_cell_start, MAX_STORAGE_CELL
            )));
        }
        let expected = self.decoder.detector_size();
        if params.detector_size != expected {
            return Err(EngineError::DetectorSizeMismatch {
                expected,
                actual: params.detector_size,
            });
        }

        let mut producer = self.producer.lock();
        if let Some(acq) = &producer.acquisition {
            return Err(EngineError::AcquisitionActive(acq.epoch));
        }

        let recycled = producer
            .last_pool
            .take()
            .map(|pool| pool.drain())
            .unwrap_or_default();
        let pool = BufferPool::with_recycled(params.detector_size, params.frames_per_train, recycled);
        let Some(active) = pool.try_acquire() else {
            return Err(EngineError::InvalidConfig("buffer pool is empty".to_string()));
        };

        let epoch = AcquisitionEpoch(self.epoch.load(Ordering::Acquire)).next();
        self.epoch.store(epoch.0, Ordering::Release);

        let boundary = BoundaryMode::from_params(params);
        producer.acquisition = Some(Acquisition {
            epoch,
            params: *params,
            boundary,
            active,
            pool,
            next_sequence: 0,
            rate: RateTracker::new(),
            warnings: WarnLimiter::new(self.config.max_warnings_per_acquisition),
            frames_received: 0,
            trains_handed_off: 0,
        });
        self.rates.store(Arc::new(RateSnapshot::default()));
        self.set_state(AssemblerState::Accumulating);

        info!(
            "Acquisition {} started: detector size {}, {} frames per train, boundary {:?}",
            epoch, params.detector_size, params.frames_per_train, boundary
        );
        Ok(epoch)
    }

    /// 帧回调
    ///
    /// `raw` 可以包含多个完整帧；第 `i` 帧使用 `header` 的元数据，帧号为
    /// `header.frame_number + i`。`raw` 只在本次调用期间有效。
    ///
    /// 只会在交换缓冲区时阻塞（最多 `handoff_timeout_ms`）。
    pub fn ingest(
        &self,
        epoch: AcquisitionEpoch,
        header: &FrameHeader,
        raw: &[u8],
    ) -> IngestOutcome {
        let frame_bytes = self.decoder.frame_bytes();

        // 停止期间生产者锁可能被长时间持有，先无锁拒绝
        let state = self.state();
        if state != AssemblerState::Accumulating {
            self.count_stale(raw.len(), frame_bytes);
            trace!(
                "Frame {} for acquisition {} arrived while {:?}, ignored",
                header.frame_number, epoch, state
            );
            return IngestOutcome::Rejected(RejectReason::NotAccumulating(state));
        }

        let mut producer = self.producer.lock();
        let state = self.state();
        let Some(acq) = producer
            .acquisition
            .as_mut()
            .filter(|_| state == AssemblerState::Accumulating)
        else {
            self.count_stale(raw.len(), frame_bytes);
            trace!(
                "Frame {} for acquisition {} arrived while {:?}, ignored",
                header.frame_number, epoch, state
            );
            return IngestOutcome::Rejected(RejectReason::NotAccumulating(state));
        };

        if acq.epoch != epoch {
            self.count_stale(raw.len(), frame_bytes);
            limited_warn!(
                acq.warnings,
                "Frame {} from stale acquisition {} ignored (current {})",
                header.frame_number,
                epoch,
                acq.epoch
            );
            return IngestOutcome::Rejected(RejectReason::StaleEpoch {
                expected: acq.epoch,
                got: epoch,
            });
        }

        if frame_bytes == 0 || raw.is_empty() || raw.len() % frame_bytes != 0 {
            self.metrics.payloads_malformed.fetch_add(1, Ordering::Relaxed);
            limited_warn!(
                acq.warnings,
                "Discarding frame {}: byte count {} is not a positive multiple of the frame size {}",
                header.frame_number,
                raw.len(),
                frame_bytes
            );
            return IngestOutcome::Rejected(RejectReason::Malformed {
                byte_count: raw.len(),
                frame_bytes,
            });
        }

        let frames = raw.len() / frame_bytes;
        acq.frames_received += frames as u64;
        self.metrics
            .frames_received
            .fetch_add(frames as u64, Ordering::Relaxed);

        let mut report = IngestReport::default();
        for index in 0..frames {
            let frame_header = FrameHeader {
                frame_number: header.frame_number.wrapping_add(index as u64),
                ..*header
            };

            if acq.is_new_train(&frame_header) && !acq.active.is_empty() {
                self.swap(acq, &mut report);
            }

            if acq.active.is_full() {
                report.dropped_overflow += 1;
                self.metrics
                    .frames_dropped_overflow
                    .fetch_add(1, Ordering::Relaxed);
                limited_warn!(
                    acq.warnings,
                    "Train buffer full ({} frames), dropping frame {} (correlation id {})",
                    acq.params.frames_per_train,
                    frame_header.frame_number,
                    frame_header.correlation_id
                );
                continue;
            }

            match acq
                .active
                .decode_into_next(self.decoder.as_ref(), raw, index, &frame_header)
            {
                Ok(_) => {
                    report.written += 1;
                    self.metrics.frames_written.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => {
                    report.decode_failed += 1;
                    self.metrics
                        .frames_decode_failed
                        .fetch_add(1, Ordering::Relaxed);
                    limited_warn!(
                        acq.warnings,
                        "Failed to decode frame {}: {}",
                        frame_header.frame_number,
                        e
                    );
                },
            }
        }

        let now = if header.arrival_time > 0.0 {
            header.arrival_time
        } else {
            wall_clock_secs()
        };
        if let Some(sample) = acq.rate.record(header.frame_number, frames as u64, now) {
            self.rates.store(Arc::new(sample));
        }

        IngestOutcome::Accepted(report)
    }

    /// 采集停止
    ///
    /// 冲刷未满的活动 train，然后发送结束信号（与 train 走同一个发布队列，
    /// 因此排在最后一个 train 之后），回到 `Idle`。之后到达的帧全部被拒绝。
    ///
    /// # 错误
    ///
    /// - 没有正在进行的采集: [`EngineError::NotRunning`]
    /// - 纪元不匹配: [`EngineError::StaleEpoch`]
    /// - 发布线程已退出: [`EngineError::ChannelClosed`]
    ///
    /// 发布队列满时会一直等待结束信号入队，只要发布线程还在运行。
    pub fn stop_acquisition(
        &self,
        epoch: AcquisitionEpoch,
        total_frames_seen: u64,
    ) -> Result<(), EngineError> {
        let mut producer = self.producer.lock();
        match producer.acquisition.as_ref().map(|acq| acq.epoch) {
            None => return Err(EngineError::NotRunning),
            Some(current) if current != epoch => {
                return Err(EngineError::StaleEpoch {
                    current,
                    got: epoch,
                });
            },
            Some(_) => {},
        }
        let Some(mut acq) = producer.acquisition.take() else {
            return Err(EngineError::NotRunning);
        };
        self.set_state(AssemblerState::Draining);

        let active = std::mem::replace(&mut acq.active, TrainBuffer::new(0, 0));
        if active.is_empty() {
            acq.pool.release(active);
        } else {
            debug!(
                "Flushing partial train of {} frames at end of acquisition {}",
                active.accumulated_frames(),
                epoch
            );
            self.hand_off(&mut acq, active, STOP_HANDOFF_TIMEOUT);
        }

        if let Some(rate) = acq.rate.finish(wall_clock_secs()) {
            info!("Frame rate (receiver) {:.1} Hz", rate);
        }
        self.rates.store(Arc::new(RateSnapshot::default()));

        let sent = self.send_end_of_stream(epoch);

        let suppressed = acq.warnings.suppressed();
        producer.last_pool = Some(acq.pool);
        self.set_state(AssemblerState::Idle);

        info!(
            "Acquisition {} stopped: {} frames seen by source, {} received, {} trains handed off",
            epoch, total_frames_seen, acq.frames_received, acq.trains_handed_off
        );
        if suppressed > 0 {
            info!("{} warnings suppressed during acquisition {}", suppressed, epoch);
        }
        if total_frames_seen > acq.frames_received {
            warn!(
                "Acquisition {}: {} frames announced by source were never delivered",
                epoch,
                total_frames_seen - acq.frames_received
            );
        }

        sent
    }

    /// 发送结束信号
    ///
    /// 队列满时持续重试，直到发布线程取走或退出；只有发布线程退出才放弃。
    fn send_end_of_stream(&self, epoch: AcquisitionEpoch) -> Result<(), EngineError> {
        let mut message = PublisherMessage::EndOfStream { epoch };
        let mut waited = Duration::ZERO;
        loop {
            match self.publish_tx.send_timeout(message, STOP_HANDOFF_TIMEOUT) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(EngineError::ChannelClosed),
                Err(SendTimeoutError::Timeout(pending)) => {
                    waited += STOP_HANDOFF_TIMEOUT;
                    warn!(
                        "Publisher backlog: end of stream for acquisition {} still queued after {:?}",
                        epoch, waited
                    );
                    message = pending;
                },
            }
        }
    }

    /// 交换活动缓冲区
    ///
    /// 有界等待空闲缓冲区；超时则丢弃当前（最旧的未发送）train，复位后继续使用同一块缓冲区。
    fn swap(&self, acq: &mut Acquisition, report: &mut IngestReport) {
        match acq.pool.acquire_timeout(self.config.handoff_timeout()) {
            Some(fresh) => {
                let full = std::mem::replace(&mut acq.active, fresh);
                if self.hand_off(acq, full, self.config.handoff_timeout()) {
                    report.trains_handed_off += 1;
                } else {
                    report.trains_dropped += 1;
                }
            },
            None => {
                let sequence = acq.take_sequence();
                let frames = acq.active.accumulated_frames();
                self.count_dropped_train(frames);
                report.trains_dropped += 1;
                limited_warn!(
                    acq.warnings,
                    "Publisher backlog: no free buffer after {:?}, dropping train {} with {} frames",
                    self.config.handoff_timeout(),
                    sequence,
                    frames
                );
                acq.active.reset();
            },
        }
    }

    /// 把已完成的缓冲区交给发布线程，失败时缓冲区回到池中
    fn hand_off(&self, acq: &mut Acquisition, buffer: TrainBuffer, timeout: Duration) -> bool {
        let sequence = acq.take_sequence();
        let frames = buffer.accumulated_frames();
        let message = PublisherMessage::Train {
            epoch: acq.epoch,
            sequence,
            buffer,
            return_to: acq.pool.returner(),
        };

        match self.publish_tx.send_timeout(message, timeout) {
            Ok(()) => {
                acq.trains_handed_off += 1;
                self.metrics.trains_handed_off.fetch_add(1, Ordering::Relaxed);
                trace!("Train {} ({} frames) handed off", sequence, frames);
                true
            },
            Err(e) => {
                let closed = matches!(e, SendTimeoutError::Disconnected(_));
                let (SendTimeoutError::Timeout(message) | SendTimeoutError::Disconnected(message)) = e;
                if let PublisherMessage::Train { buffer, .. } = message {
                    acq.pool.release(buffer);
                }
                self.count_dropped_train(frames);
                limited_warn!(
                    acq.warnings,
                    "Failed to hand off train {} with {} frames: publisher {}",
                    sequence,
                    frames,
                    if closed { "is gone" } else { "queue is full" }
                );
                false
            },
        }
    }

    fn count_dropped_train(&self, frames: usize) {
        self.metrics
            .trains_dropped_backpressure
            .fetch_add(1, Ordering::Relaxed);
        self.metrics
            .frames_dropped_backpressure
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    fn count_stale(&self, byte_count: usize, frame_bytes: usize) {
        let frames = if frame_bytes == 0 {
            1
        } else {
            (byte_count / frame_bytes).max(1)
        };
        self.metrics
            .frames_dropped_stale
            .fetch_add(frames as u64, Ordering::Relaxed);
    }
}

impl AcquisitionHandler for TrainAssembler {
    fn on_acquisition_start(
        &self,
        params: &AcquisitionParams,
    ) -> Result<AcquisitionEpoch, SourceError> {
        self.start_acquisition(params)
            .map_err(|e| SourceError::Rejected(e.to_string()))
    }

    fn on_frame_ready(&self, epoch: AcquisitionEpoch, header: &FrameHeader, buffer: &[u8]) {
        self.ingest(epoch, header, buffer);
    }

    fn on_acquisition_stop(&self, epoch: AcquisitionEpoch, total_frames_seen: u64) {
        if let Err(e) = self.stop_acquisition(epoch, total_frames_seen) {
            warn!("Failed to stop acquisition {}: {}", epoch, e);
        }
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, bounded};
    use slsrx_protocol::{DetectorType, MaskedDecoder};

    fn assembler(queue: usize) -> (TrainAssembler, Receiver<PublisherMessage>) {
        let decoder = MaskedDecoder::new(DetectorType::Generic, &[2], 0x3FFF, 0xC000, 14).unwrap();
        let (tx, rx) = bounded(queue);
        let config = AssemblerConfig {
            handoff_timeout_ms: 5,
            ..Default::default()
        };
        (
            TrainAssembler::new(Arc::new(decoder), config, tx, Arc::new(EngineMetrics::new())),
            rx,
        )
    }

    fn frame(value: u16) -> Vec<u8> {
        [value, value].iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn header(frame_number: u64, correlation_id: u64) -> FrameHeader {
        FrameHeader::new(frame_number, correlation_id).with_arrival_time(1.0)
    }

    #[test]
    fn test_state_transitions() {
        let (assembler, rx) = assembler(4);
        assert_eq!(assembler.state(), AssemblerState::Idle);
        assert_eq!(assembler.current_epoch(), AcquisitionEpoch(0));

        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 3)).unwrap();
        assert_eq!(epoch, AcquisitionEpoch(1));
        assert_eq!(assembler.state(), AssemblerState::Accumulating);
        assert_eq!(assembler.active_frames(), Some(0));

        assembler.stop_acquisition(epoch, 0).unwrap();
        assert_eq!(assembler.state(), AssemblerState::Idle);
        assert_eq!(assembler.active_frames(), None);

        // 空采集：只有结束信号
        assert!(matches!(
            rx.try_recv().unwrap(),
            PublisherMessage::EndOfStream { epoch: e } if e == epoch
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_validation() {
        let (assembler, _rx) = assembler(4);
        assert!(matches!(
            assembler.start_acquisition(&AcquisitionParams::new(2, 0)),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(matches!(
            assembler.start_acquisition(&AcquisitionParams::new(3, 1)),
            Err(EngineError::DetectorSizeMismatch { expected: 2, actual: 3 })
        ));

        // 直接构造的参数绕过了 with_burst_mode 的截断
        let mut params = AcquisitionParams::new(2, 1).with_burst_mode(3);
        params.storage_cell_start = 20;
        assert!(matches!(
            assembler.start_acquisition(&params),
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(assembler.state(), AssemblerState::Idle);

        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 1)).unwrap();
        assert!(matches!(
            assembler.start_acquisition(&AcquisitionParams::new(2, 1)),
            Err(EngineError::AcquisitionActive(e)) if e == epoch
        ));
    }

    #[test]
    fn test_stop_validation() {
        let (assembler, _rx) = assembler(4);
        assert!(matches!(
            assembler.stop_acquisition(AcquisitionEpoch(1), 0),
            Err(EngineError::NotRunning)
        ));

        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 1)).unwrap();
        assert!(matches!(
            assembler.stop_acquisition(AcquisitionEpoch(7), 0),
            Err(EngineError::StaleEpoch { .. })
        ));
        assert!(assembler.stop_acquisition(epoch, 0).is_ok());
    }

    #[test]
    fn test_boundary_on_new_correlation_id() {
        let (assembler, rx) = assembler(4);
        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 4)).unwrap();

        assert!(assembler.ingest(epoch, &header(1, 10), &frame(1)).is_accepted());
        assembler.ingest(epoch, &header(2, 10), &frame(2));
        let outcome = assembler.ingest(epoch, &header(3, 11), &frame(3));
        assert_eq!(outcome.report().unwrap().trains_handed_off, 1);
        assert_eq!(assembler.active_frames(), Some(1));

        match rx.try_recv().unwrap() {
            PublisherMessage::Train {
                sequence, buffer, ..
            } => {
                assert_eq!(sequence, 0);
                assert_eq!(buffer.correlation_ids(), &[10, 10]);
                assert_eq!(buffer.adc(), &[1, 1, 2, 2]);
            },
            PublisherMessage::EndOfStream { .. } => panic!("expected a train"),
        }
    }

    #[test]
    fn test_memory_cell_boundary() {
        let (assembler, rx) = assembler(4);
        let params = AcquisitionParams::new(2, 3).with_burst_mode(15);
        let epoch = assembler.start_acquisition(&params).unwrap();

        for (n, cell) in [(1u64, 15u8), (2, 14), (3, 13), (4, 15), (5, 14)] {
            let h = header(n, 7).with_memory_cell(Some(cell));
            assembler.ingest(epoch, &h, &frame(n as u16));
        }

        // 关联 ID 不变，仅存储单元触发边界
        match rx.try_recv().unwrap() {
            PublisherMessage::Train { buffer, .. } => {
                assert_eq!(buffer.memory_cells(), &[15, 14, 13]);
            },
            PublisherMessage::EndOfStream { .. } => panic!("expected a train"),
        }
        assert_eq!(assembler.active_frames(), Some(2));
    }

    #[test]
    fn test_multi_frame_payload() {
        let (assembler, _rx) = assembler(4);
        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 4)).unwrap();

        let mut raw = frame(1);
        raw.extend(frame(2));
        raw.extend(frame(3));
        let outcome = assembler.ingest(epoch, &header(10, 0), &raw);
        assert_eq!(outcome.report().unwrap().written, 3);
        assert_eq!(assembler.metrics().snapshot().frames_received, 3);
    }

    #[test]
    fn test_multi_frame_payload_wraps_frame_number() {
        let (assembler, rx) = assembler(4);
        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 4)).unwrap();

        let mut raw = frame(1);
        raw.extend(frame(2));
        let outcome = assembler.ingest(epoch, &header(u64::MAX, 0), &raw);
        assert_eq!(outcome.report().unwrap().written, 2);

        assembler.stop_acquisition(epoch, 2).unwrap();
        match rx.try_recv().unwrap() {
            PublisherMessage::Train { buffer, .. } => {
                assert_eq!(buffer.frame_numbers(), &[u64::MAX, 0]);
            },
            PublisherMessage::EndOfStream { .. } => panic!("expected a train"),
        }
    }

    #[test]
    fn test_rejects_when_idle() {
        let (assembler, _rx) = assembler(4);
        let outcome = assembler.ingest(AcquisitionEpoch(1), &header(1, 1), &frame(1));
        assert_eq!(
            outcome,
            IngestOutcome::Rejected(RejectReason::NotAccumulating(AssemblerState::Idle))
        );
        assert_eq!(assembler.metrics().snapshot().frames_dropped_stale, 1);
    }

    #[test]
    fn test_decode_failure_keeps_slot_free() {
        struct FailingDecoder;

        impl FrameDecoder for FailingDecoder {
            fn detector_type(&self) -> DetectorType {
                DetectorType::Generic
            }

            fn display_shape(&self) -> slsrx_protocol::Shape {
                smallvec::smallvec![2]
            }

            fn decode(
                &self,
                _raw: &[u8],
                _index: usize,
                _adc: &mut [u16],
                _gain: &mut [u8],
            ) -> Result<(), slsrx_protocol::ProtocolError> {
                Err(slsrx_protocol::ProtocolError::InvalidShape("corrupt".to_string()))
            }
        }

        let (tx, _rx) = bounded(4);
        let assembler = TrainAssembler::new(
            Arc::new(FailingDecoder),
            AssemblerConfig::default(),
            tx,
            Arc::new(EngineMetrics::new()),
        );
        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 2)).unwrap();
        let outcome = assembler.ingest(epoch, &header(1, 1), &frame(1));
        assert_eq!(outcome.report().unwrap().decode_failed, 1);
        assert_eq!(assembler.active_frames(), Some(0));
        assert_eq!(assembler.metrics().snapshot().frames_decode_failed, 1);
    }

    #[test]
    fn test_rates_published_and_reset() {
        let (assembler, _rx) = assembler(4);
        let epoch = assembler.start_acquisition(&AcquisitionParams::new(2, 100)).unwrap();

        assembler.ingest(epoch, &FrameHeader::new(1, 0).with_arrival_time(10.0), &frame(0));
        assembler.ingest(epoch, &FrameHeader::new(2, 0).with_arrival_time(10.5), &frame(0));
        assembler.ingest(epoch, &FrameHeader::new(5, 0).with_arrival_time(12.0), &frame(0));

        let rates = assembler.rates();
        assert_eq!(rates.frame_rate_in, 2.0);
        assert_eq!(rates.frame_rate_out, 1.5);

        assembler.stop_acquisition(epoch, 3).unwrap();
        assert_eq!(assembler.rates(), RateSnapshot::default());
    }
}
