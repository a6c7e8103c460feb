//! 原始数据文件输出
//!
//! 把每帧的 ADC 数据（小端 u16）顺序写入 `.raw` 文件，每个文件最多
//! [`MAX_FRAMES_PER_FILE`] 帧。文件名格式：
//!
//! ```text
//! {dir}/{name}_d0_f{first_frame:012}_{file_index}.raw
//! ```
//!
//! `first_frame` 是文件中第一帧在本次采集中的序号（从 0 开始），
//! `file_index` 每次采集结束后加 1。

use slsrx_engine::{OutputSink, SinkError, TrainView};
use slsrx_protocol::AcquisitionEpoch;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 单个文件的最大帧数
pub const MAX_FRAMES_PER_FILE: u64 = 20000;

/// 默认输出目录
pub const DEFAULT_DIR: &str = "/tmp";

/// 默认文件名前缀
pub const DEFAULT_NAME: &str = "run";

/// 原始数据文件输出端
pub struct RawFileSink {
    dir: PathBuf,
    name: String,
    file_index: u64,
    max_frames_per_file: u64,
    writer: Option<BufWriter<File>>,
    acquisition_frames: u64,
    file_first_frame: u64,
    files: Vec<PathBuf>,
}

impl RawFileSink {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            file_index: 0,
            max_frames_per_file: MAX_FRAMES_PER_FILE,
            writer: None,
            acquisition_frames: 0,
            file_first_frame: 0,
            files: Vec::new(),
        }
    }

    /// 起始文件序号
    pub fn with_file_index(mut self, file_index: u64) -> Self {
        self.file_index = file_index;
        self
    }

    /// 单文件最大帧数（至少 1）
    pub fn with_max_frames_per_file(mut self, max_frames: u64) -> Self {
        self.max_frames_per_file = max_frames.max(1);
        self
    }

    /// 已创建的文件
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_index(&self) -> u64 {
        self.file_index
    }

    /// 生成文件路径
    pub fn file_path(dir: &Path, name: &str, first_frame: u64, file_index: u64) -> PathBuf {
        dir.join(format!("{}_d0_f{:012}_{}.raw", name, first_frame, file_index))
    }

    fn open_next(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        self.file_first_frame = self.acquisition_frames;
        let path = Self::file_path(&self.dir, &self.name, self.file_first_frame, self.file_index);
        let file = File::create(&path)?;
        debug!("Opened raw file {}", path.display());
        self.files.push(path);

        Ok(self.writer.insert(BufWriter::new(file)))
    }
}

impl Default for RawFileSink {
    fn default() -> Self {
        Self::new(DEFAULT_DIR, DEFAULT_NAME)
    }
}

impl OutputSink for RawFileSink {
    fn name(&self) -> &str {
        "raw-file"
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        for index in 0..train.frames() {
            let Some(adc) = train.frame_adc(index) else {
                break;
            };

            let roll = self.writer.is_none()
                || self.acquisition_frames - self.file_first_frame >= self.max_frames_per_file;
            let writer = match (roll, self.writer.as_mut()) {
                (false, Some(writer)) => writer,
                _ => self.open_next()?,
            };

            for word in adc {
                writer.write_all(&word.to_le_bytes())?;
            }
            self.acquisition_frames += 1;
        }
        Ok(())
    }

    fn end_of_stream(&mut self, epoch: AcquisitionEpoch) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(
                "Acquisition {}: {} frames written to raw files (index {})",
                epoch, self.acquisition_frames, self.file_index
            );
            self.file_index += 1;
        }
        self.acquisition_frames = 0;
        self.file_first_frame = 0;
        Ok(())
    }
}
