//! 模拟探测器
//!
//! 在独立线程中按曝光周期生成帧，并通过 [`AcquisitionHandler`] 回调推送，
//! 用于在没有硬件的情况下驱动完整的接收链路。
//!
//! # 数据生成
//!
//! 启动时预生成 `2 × channels` 个字（`baseline + rand % noise`，增益位打包在高位），
//! 每帧从中随机截取 `channels` 个字的窗口（`Bytes::slice`，零拷贝）。
//!
//! # 节拍
//!
//! 每帧先睡眠 `delay + exptime - 1` µs，再睡眠 `period - delay - exptime - 1` µs，
//! 非正值跳过。使用 `spin_sleep` 获得微秒级精度。

use crate::{AcquisitionHandler, SourceError};
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use slsrx_protocol::decoder::{GOTTHARD_CHANNELS, JUNGFRAU_PIXEL_X, JUNGFRAU_PIXEL_Y};
use slsrx_protocol::{
    AcquisitionEpoch, AcquisitionParams, DEFAULT_STORAGE_CELL_START, DetectorHeader,
    DetectorType, FrameDecoder,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// 存储单元数量
const STORAGE_CELLS: u8 = 16;

/// 探测器增益设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorSettings {
    #[default]
    Uninitialized,
    DynamicGain,
    HighGain,
    LowGain,
    MediumGain,
    VeryHighGain,
}

impl DetectorSettings {
    /// 打包到数据字高位的增益值
    fn gain_bits(self) -> u16 {
        match self {
            Self::MediumGain => 1,
            Self::LowGain => 3,
            _ => 0,
        }
    }
}

impl std::str::FromStr for DetectorSettings {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uninitialized" => Ok(Self::Uninitialized),
            "dynamicgain" => Ok(Self::DynamicGain),
            "highgain" => Ok(Self::HighGain),
            "lowgain" => Ok(Self::LowGain),
            "mediumgain" => Ok(Self::MediumGain),
            "veryhighgain" => Ok(Self::VeryHighGain),
            other => Err(format!("unknown settings '{}'", other)),
        }
    }
}

/// 基线/噪声表：(探测器类型, 设置, 基线, 噪声)
const BASELINE_NOISE: &[(DetectorType, DetectorSettings, u16, u16)] = &[
    (DetectorType::Generic, DetectorSettings::Uninitialized, 81, 12),
    (DetectorType::Gotthard, DetectorSettings::Uninitialized, 4781, 156),
    (DetectorType::Gotthard, DetectorSettings::DynamicGain, 4781, 156),
    (DetectorType::Gotthard, DetectorSettings::HighGain, 4781, 156),
    (DetectorType::Gotthard, DetectorSettings::LowGain, 1962, 113),
    (DetectorType::Gotthard, DetectorSettings::MediumGain, 2676, 79),
    (DetectorType::Gotthard, DetectorSettings::VeryHighGain, 5431, 187),
];

/// 查询基线和噪声
///
/// 查找顺序：(类型, 设置) → (类型, 未初始化) → (通用, 未初始化)。
pub fn baseline_noise(detector_type: DetectorType, settings: DetectorSettings) -> (u16, u16) {
    let lookup = |dt: DetectorType, s: DetectorSettings| {
        BASELINE_NOISE
            .iter()
            .find(|(t, set, _, _)| *t == dt && *set == s)
            .map(|(_, _, baseline, noise)| (*baseline, *noise))
    };

    lookup(detector_type, settings)
        .or_else(|| lookup(detector_type, DetectorSettings::Uninitialized))
        .unwrap_or((81, 12))
}

/// 探测器类型对应的通道数（0 表示不支持模拟）
pub fn channel_count(detector_type: DetectorType) -> usize {
    match detector_type {
        DetectorType::Jungfrau => JUNGFRAU_PIXEL_X * JUNGFRAU_PIXEL_Y,
        DetectorType::Gotthard | DetectorType::Gotthard2 => GOTTHARD_CHANNELS,
        _ => 0,
    }
}

fn gain_shift(detector_type: DetectorType) -> u16 {
    match detector_type {
        DetectorType::Gotthard2 => 12,
        _ => 14,
    }
}

/// 模拟探测器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// 曝光周期（微秒）
    pub period_us: u64,
    /// 曝光时间（微秒）
    pub exptime_us: u64,
    /// 触发延迟（微秒）
    pub delay_us: u64,
    /// 每个 train 的帧数（传给 `on_acquisition_start`）
    pub frames_per_train: usize,
    /// 连续多少帧共享一个 bunch ID（0 表示不提供 ID）
    pub frames_per_correlation_id: u64,
    /// burst（存储单元）模式
    pub burst_mode: bool,
    /// 起始存储单元
    pub storage_cell_start: u8,
    /// 增益设置
    pub settings: DetectorSettings,
    /// 发送指定帧数后自动结束（None 表示直到 stop）
    pub max_frames: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period_us: 1000,
            exptime_us: 10,
            delay_us: 0,
            frames_per_train: 1,
            frames_per_correlation_id: 10,
            burst_mode: false,
            storage_cell_start: DEFAULT_STORAGE_CELL_START,
            settings: DetectorSettings::Uninitialized,
            max_frames: None,
        }
    }
}

impl SimulationConfig {
    /// 单帧采集阶段的睡眠时间
    fn acquisition_sleep(&self) -> Option<Duration> {
        let us = self.delay_us as i64 + self.exptime_us as i64 - 1;
        (us > 0).then(|| Duration::from_micros(us as u64))
    }

    /// 帧间隔剩余的睡眠时间
    fn idle_sleep(&self) -> Option<Duration> {
        let us = self.period_us as i64 - self.delay_us as i64 - self.exptime_us as i64 - 1;
        (us > 0).then(|| Duration::from_micros(us as u64))
    }
}

/// 一次运行中的采集
struct Session {
    handler: Arc<dyn AcquisitionHandler>,
    epoch: AcquisitionEpoch,
    thread: JoinHandle<()>,
}

/// 模拟探测器
///
/// # 示例
///
/// ```no_run
/// use slsrx_protocol::MaskedDecoder;
/// use slsrx_source::{AcquisitionHandler, SimulatedDetector, SimulationConfig};
/// use std::sync::Arc;
///
/// # fn run(handler: Arc<dyn AcquisitionHandler>) -> Result<(), slsrx_source::SourceError> {
/// let config = SimulationConfig { max_frames: Some(100), ..Default::default() };
/// let mut detector = SimulatedDetector::new(config, Arc::new(MaskedDecoder::gotthard()))?;
/// detector.start(handler)?;
/// detector.wait_finished(std::time::Duration::from_secs(5));
/// let frames = detector.stop()?;
/// assert_eq!(frames, 100);
/// # Ok(())
/// # }
/// ```
pub struct SimulatedDetector {
    config: SimulationConfig,
    decoder: Arc<dyn FrameDecoder>,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    session: Option<Session>,
}

impl SimulatedDetector {
    /// 创建模拟探测器
    ///
    /// # 错误
    ///
    /// - 探测器类型没有模拟通道数：`UnsupportedDetector`
    /// - 解码器像素数与通道数不一致，或 `frames_per_train == 0`：`InvalidConfig`
    pub fn new(
        config: SimulationConfig,
        decoder: Arc<dyn FrameDecoder>,
    ) -> Result<Self, SourceError> {
        let detector_type = decoder.detector_type();
        let channels = channel_count(detector_type);
        if channels == 0 {
            return Err(SourceError::UnsupportedDetector(detector_type));
        }
        if decoder.detector_size() != channels {
            return Err(SourceError::InvalidConfig(format!(
                "decoder size {} does not match {} channels of {}",
                decoder.detector_size(),
                channels,
                detector_type
            )));
        }
        if config.frames_per_train == 0 {
            return Err(SourceError::InvalidConfig(
                "frames_per_train must be > 0".to_string(),
            ));
        }

        Ok(Self {
            config,
            decoder,
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            session: None,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// 已发送帧数
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// 采集参数
    pub fn params(&self) -> AcquisitionParams {
        let params = AcquisitionParams::new(self.decoder.detector_size(), self.config.frames_per_train);
        if self.config.burst_mode {
            params.with_burst_mode(self.config.storage_cell_start)
        } else {
            params
        }
    }

    /// 开始采集
    ///
    /// 调用 `on_acquisition_start`，成功后启动数据线程。
    pub fn start(&mut self, handler: Arc<dyn AcquisitionHandler>) -> Result<(), SourceError> {
        if self.session.is_some() {
            return Err(SourceError::AlreadyRunning);
        }

        let epoch = handler.on_acquisition_start(&self.params())?;

        let payload = generate_payload(self.decoder.detector_type(), self.config.settings);
        self.running.store(true, Ordering::Release);
        self.finished.store(false, Ordering::Release);
        self.frames_sent.store(0, Ordering::Relaxed);

        let worker = DataWorker {
            config: self.config.clone(),
            decoder: self.decoder.clone(),
            handler: handler.clone(),
            epoch,
            payload,
            running: self.running.clone(),
            finished: self.finished.clone(),
            frames_sent: self.frames_sent.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("slsrx-sim-data".to_string())
            .spawn(move || worker.run());

        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                handler.on_acquisition_stop(epoch, 0);
                return Err(SourceError::Io(e));
            },
        };

        info!(
            "Simulated {} acquisition {} started (period {} us)",
            self.decoder.detector_type(),
            epoch,
            self.config.period_us
        );

        self.session = Some(Session {
            handler,
            epoch,
            thread,
        });
        Ok(())
    }

    /// 等待达到 `max_frames`（超时返回 false）
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.finished.load(Ordering::Acquire) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.finished.load(Ordering::Acquire)
    }

    /// 停止采集
    ///
    /// 等待数据线程退出后调用一次 `on_acquisition_stop`，返回已发送帧数。
    pub fn stop(&mut self) -> Result<u64, SourceError> {
        let session = self.session.take().ok_or(SourceError::NotRunning)?;

        self.running.store(false, Ordering::Release);
        let joined = session.thread.join();

        let frames = self.frames_sent.load(Ordering::Relaxed);
        session.handler.on_acquisition_stop(session.epoch, frames);
        info!("Simulated acquisition {} stopped after {} frames", session.epoch, frames);

        joined.map_err(|_| SourceError::Thread("data thread panicked".to_string()))?;
        Ok(frames)
    }
}

impl Drop for SimulatedDetector {
    fn drop(&mut self) {
        if self.session.is_some()
            && let Err(e) = self.stop()
        {
            warn!("Failed to stop simulated detector on drop: {}", e);
        }
    }
}

/// 预生成 `2 × channels` 个数据字
fn generate_payload(detector_type: DetectorType, settings: DetectorSettings) -> Bytes {
    let channels = channel_count(detector_type);
    let (baseline, noise) = baseline_noise(detector_type, settings);
    let gain = settings.gain_bits() << gain_shift(detector_type);

    let mut rng = rand::thread_rng();
    let mut data = Vec::with_capacity(2 * channels * 2);
    for _ in 0..2 * channels {
        let word = baseline.wrapping_add(rng.gen_range(0..noise.max(1))) | gain;
        data.extend_from_slice(&word.to_le_bytes());
    }
    Bytes::from(data)
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// 数据线程状态
struct DataWorker {
    config: SimulationConfig,
    decoder: Arc<dyn FrameDecoder>,
    handler: Arc<dyn AcquisitionHandler>,
    epoch: AcquisitionEpoch,
    payload: Bytes,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
}

impl DataWorker {
    fn run(self) {
        let channels = self.decoder.detector_size();
        let frame_bytes = self.decoder.frame_bytes();
        let detector_type = self.decoder.detector_type();
        let cells_per_train = self.config.frames_per_train.clamp(1, STORAGE_CELLS as usize) as u64;
        let storage_cell_start = self.config.storage_cell_start.min(STORAGE_CELLS - 1);
        let acquisition_sleep = self.config.acquisition_sleep();
        let idle_sleep = self.config.idle_sleep();

        let mut rng = rand::thread_rng();
        let mut frame_counter: u64 = 0;

        // Acquire: 看到 false 时必须看到 stop() 之前的所有写入
        while self.running.load(Ordering::Acquire) {
            if let Some(max) = self.config.max_frames
                && frame_counter >= max
            {
                break;
            }

            frame_counter += 1;

            let bunch_id = if self.config.frames_per_correlation_id > 0 {
                1 + (frame_counter - 1) / self.config.frames_per_correlation_id
            } else {
                0
            };

            let debug = if self.config.burst_mode {
                let step = ((frame_counter - 1) % cells_per_train) as u8;
                let cell = (storage_cell_start + STORAGE_CELLS - step) % STORAGE_CELLS;
                (cell as u32) << 8
            } else {
                0
            };

            let detector_header = DetectorHeader {
                frame_number: frame_counter,
                packet_number: 2,
                det_spec1: bunch_id,
                debug,
                det_type: detector_type.into(),
                version: 1,
                ..Default::default()
            };

            // 随机窗口：数据缓冲区是单帧的两倍
            let offset = rng.gen_range(0..channels) * 2;
            let frame = self.payload.slice(offset..offset + frame_bytes);

            let memory_cell = self.decoder.memory_cell(&detector_header);
            let header = detector_header.to_frame_header(memory_cell, wall_clock_secs());
            self.handler.on_frame_ready(self.epoch, &header, &frame);
            self.frames_sent.store(frame_counter, Ordering::Relaxed);

            if let Some(sleep) = acquisition_sleep {
                spin_sleep::sleep(sleep);
            }
            if let Some(sleep) = idle_sleep {
                spin_sleep::sleep(sleep);
            }
        }

        debug!("Simulation data thread exiting after {} frames", frame_counter);
        self.finished.store(true, Ordering::Release);
    }
}
