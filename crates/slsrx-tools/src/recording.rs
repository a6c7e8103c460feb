//! # 录制格式定义
//!
//! 把发布的 train 深拷贝后保存为单个文件，供离线回放和 `inspect` 使用

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slsrx_engine::{OutputSink, OwnedTrain, SinkError, TrainView};
use slsrx_protocol::AcquisitionEpoch;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 录制文件魔数（用于文件格式识别）
pub const MAGIC: &[u8; 8] = b"SLSRXV1\0";

/// 当前格式版本
pub const VERSION: u8 = 1;

/// SLSRX 录制文件 v1
///
/// 文件格式：
///
/// ```text
/// [MAGIC: 8 bytes]
/// [Version: 1 byte]
/// [Data: bincode serialized TrainRecording]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRecording {
    /// 格式版本
    pub version: u8,

    /// 元数据
    pub metadata: RecordingMetadata,

    /// 按发布顺序排列的 train
    pub trains: Vec<OwnedTrain>,
}

impl TrainRecording {
    /// 创建新的录制
    pub fn new(metadata: RecordingMetadata) -> Self {
        Self {
            version: VERSION,
            metadata,
            trains: Vec::new(),
        }
    }

    pub fn add_train(&mut self, train: OwnedTrain) {
        self.trains.push(train);
    }

    pub fn train_count(&self) -> usize {
        self.trains.len()
    }

    /// 所有 train 的帧数之和
    pub fn frame_count(&self) -> usize {
        self.trains.iter().map(OwnedTrain::frames).sum()
    }

    /// 只保留某次采集的 train
    pub fn filter_by_epoch(&self, epoch: AcquisitionEpoch) -> TrainRecording {
        let mut filtered = TrainRecording::new(self.metadata.clone());
        filtered
            .trains
            .extend(self.trains.iter().filter(|t| t.epoch == epoch).cloned());
        filtered
    }

    /// 录制中出现过的采集编号（按首次出现顺序）
    pub fn epochs(&self) -> Vec<AcquisitionEpoch> {
        let mut epochs: Vec<AcquisitionEpoch> = Vec::new();
        for train in &self.trains {
            if !epochs.contains(&train.epoch) {
                epochs.push(train.epoch);
            }
        }
        epochs
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create recording {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC).context("failed to write magic")?;
        writer.write_all(&[self.version]).context("failed to write version")?;

        let data = bincode::serialize(self).context("failed to serialize recording")?;
        writer.write_all(&data).context("failed to write recording data")?;
        writer.flush().context("failed to flush recording")?;

        Ok(())
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open recording {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).context("failed to read magic")?;
        if &magic != MAGIC {
            anyhow::bail!("not a slsrx recording (magic mismatch)");
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version).context("failed to read version")?;
        if version[0] != VERSION {
            anyhow::bail!("unsupported recording version: {}", version[0]);
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data).context("failed to read recording data")?;
        let recording: TrainRecording =
            bincode::deserialize(&data).context("failed to deserialize recording")?;

        Ok(recording)
    }
}

/// 录制元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// 录制开始时间（Unix 时间戳，秒）
    pub start_time: u64,

    /// 探测器类型名称
    pub detector: String,

    /// 每个 train 的帧数
    pub frames_per_train: usize,

    /// 平台信息
    pub platform: String,

    /// 备注
    pub notes: String,
}

impl RecordingMetadata {
    pub fn new(detector: impl Into<String>, frames_per_train: usize) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        Self {
            start_time: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            detector: detector.into(),
            frames_per_train,
            platform: std::env::consts::OS.to_string(),
            notes: String::new(),
        }
    }
}

/// 录制输出端
///
/// 每个发布的 train 深拷贝一份追加到共享录制中。设置了输出路径时，
/// 每次采集结束都会把当前录制写入文件（覆盖写）。
pub struct RecordingSink {
    recording: Arc<Mutex<TrainRecording>>,
    output: Option<PathBuf>,
}

impl RecordingSink {
    pub fn new(metadata: RecordingMetadata) -> Self {
        Self {
            recording: Arc::new(Mutex::new(TrainRecording::new(metadata))),
            output: None,
        }
    }

    /// 每次采集结束时保存到 `path`
    pub fn save_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// 获取录制句柄（在发布线程之外读取）
    pub fn handle(&self) -> RecordingHandle {
        RecordingHandle(self.recording.clone())
    }
}

/// 录制的只读句柄
#[derive(Debug, Clone)]
pub struct RecordingHandle(Arc<Mutex<TrainRecording>>);

impl RecordingHandle {
    /// 当前录制的快照
    pub fn snapshot(&self) -> TrainRecording {
        self.0.lock().clone()
    }

    pub fn train_count(&self) -> usize {
        self.0.lock().train_count()
    }
}

impl OutputSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        self.recording.lock().add_train(train.to_owned());
        Ok(())
    }

    fn end_of_stream(&mut self, epoch: AcquisitionEpoch) -> Result<(), SinkError> {
        let Some(path) = &self.output else {
            return Ok(());
        };

        let recording = self.recording.lock();
        recording
            .save(path)
            .map_err(|e| SinkError::Serialization(format!("{:#}", e)))?;
        info!(
            "Acquisition {}: recording saved to {} ({} trains)",
            epoch,
            path.display(),
            recording.train_count()
        );
        Ok(())
    }
}
