//! # 统计工具
//!
//! Train 级和采集级统计（可选模块）
//!
//! 需要启用 `statistics` feature：
//! ```toml
//! slsrx-tools = { workspace = true, features = ["statistics"] }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slsrx_engine::{OutputSink, OwnedTrain, SinkError, TrainView};
use slsrx_protocol::AcquisitionEpoch;
use std::sync::Arc;

/// 增益档位数（2 位增益）
pub const GAIN_LEVELS: usize = 4;

/// 单个 train 的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainStatistics {
    pub epoch: AcquisitionEpoch,
    pub sequence: u64,

    /// 帧数
    pub frames: usize,

    /// ADC 平均值
    pub adc_mean: f64,

    /// ADC 标准差
    pub adc_std_dev: f64,

    pub adc_min: u16,
    pub adc_max: u16,

    /// 各增益档位的像素计数
    pub gain_histogram: [u64; GAIN_LEVELS],

    pub first_frame: u64,
    pub last_frame: u64,

    /// train 内部帧号缺口（缺失的帧数）
    pub frame_gaps: u64,
}

impl TrainStatistics {
    pub fn from_train(train: &OwnedTrain) -> Self {
        Self::calculate(
            train.epoch,
            train.sequence,
            &train.adc,
            &train.gain,
            &train.frame_number,
        )
    }

    pub fn from_view(train: &TrainView<'_>) -> Self {
        Self::calculate(
            train.epoch(),
            train.sequence(),
            train.adc(),
            train.gain(),
            train.frame_number(),
        )
    }

    fn calculate(
        epoch: AcquisitionEpoch,
        sequence: u64,
        adc: &[u16],
        gain: &[u8],
        frame_numbers: &[u64],
    ) -> Self {
        let (adc_mean, adc_std_dev) = if adc.is_empty() {
            (0.0, 0.0)
        } else {
            let values = || adc.iter().map(|&v| f64::from(v));
            let std_dev = if adc.len() > 1 {
                statrs::statistics::Statistics::std_dev(values())
            } else {
                0.0
            };
            (statrs::statistics::Statistics::mean(values()), std_dev)
        };

        let mut gain_histogram = [0u64; GAIN_LEVELS];
        for &g in gain {
            gain_histogram[usize::from(g) % GAIN_LEVELS] += 1;
        }

        Self {
            epoch,
            sequence,
            frames: frame_numbers.len(),
            adc_mean,
            adc_std_dev,
            adc_min: adc.iter().copied().min().unwrap_or(0),
            adc_max: adc.iter().copied().max().unwrap_or(0),
            gain_histogram,
            first_frame: frame_numbers.first().copied().unwrap_or(0),
            last_frame: frame_numbers.last().copied().unwrap_or(0),
            frame_gaps: count_gaps(frame_numbers),
        }
    }
}

/// 统计相邻帧号之间缺失的帧数（非递增的相邻对不计入）
pub fn count_gaps(frame_numbers: &[u64]) -> u64 {
    frame_numbers
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]).saturating_sub(1))
        .sum()
}

/// 一次采集（或一段录制）的汇总统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub trains: u64,
    pub frames: u64,

    /// 帧号缺口总数（train 内部 + train 之间）
    pub frame_gaps: u64,

    /// 按帧数加权的 ADC 平均值
    pub adc_mean: f64,

    pub gain_histogram: [u64; GAIN_LEVELS],

    /// train 帧数的标准差
    pub frames_per_train_std_dev: f64,

    #[serde(skip)]
    last_frame: Option<u64>,
    #[serde(skip)]
    train_sizes: Vec<f64>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 汇总一组 train
    pub fn from_trains<'a>(trains: impl IntoIterator<Item = &'a OwnedTrain>) -> Self {
        let mut stats = Self::new();
        for train in trains {
            stats.add(&TrainStatistics::from_train(train));
        }
        stats
    }

    /// 按发布顺序加入一个 train
    pub fn add(&mut self, train: &TrainStatistics) {
        if train.frames == 0 {
            return;
        }

        let total = self.frames + train.frames as u64;
        self.adc_mean = (self.adc_mean * self.frames as f64
            + train.adc_mean * train.frames as f64)
            / total as f64;
        self.frames = total;
        self.trains += 1;

        self.frame_gaps += train.frame_gaps;
        if let Some(last) = self.last_frame {
            self.frame_gaps += train.first_frame.saturating_sub(last).saturating_sub(1);
        }
        self.last_frame = Some(train.last_frame);

        for (total, count) in self.gain_histogram.iter_mut().zip(train.gain_histogram) {
            *total += count;
        }

        self.train_sizes.push(train.frames as f64);
        self.frames_per_train_std_dev = if self.train_sizes.len() > 1 {
            statrs::statistics::Statistics::std_dev(&self.train_sizes)
        } else {
            0.0
        };
    }

    /// 丢帧率（%）
    pub fn loss_rate(&self) -> f64 {
        let expected = self.frames + self.frame_gaps;
        if expected == 0 {
            return 0.0;
        }
        (self.frame_gaps as f64 / expected as f64) * 100.0
    }

    /// 平均每个 train 的帧数
    pub fn mean_frames_per_train(&self) -> f64 {
        if self.trains == 0 {
            return 0.0;
        }
        self.frames as f64 / self.trains as f64
    }
}

/// 在发布线程上累计统计的输出端
///
/// 每次采集开始后的第一个 train 会清空上一次的统计。
pub struct StatisticsSink {
    current: Arc<Mutex<RunStatistics>>,
    epoch: Option<AcquisitionEpoch>,
}

impl StatisticsSink {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(RunStatistics::new())),
            epoch: None,
        }
    }

    /// 共享的统计结果
    pub fn handle(&self) -> Arc<Mutex<RunStatistics>> {
        self.current.clone()
    }
}

impl Default for StatisticsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StatisticsSink {
    fn name(&self) -> &str {
        "statistics"
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        let mut current = self.current.lock();
        if self.epoch != Some(train.epoch()) {
            *current = RunStatistics::new();
            self.epoch = Some(train.epoch());
        }
        current.add(&TrainStatistics::from_view(train));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slsrx_engine::TrainBuffer;
    use slsrx_protocol::FrameHeader;

    fn train(sequence: u64, frame_numbers: &[u64]) -> OwnedTrain {
        let mut buffer = TrainBuffer::new(2, frame_numbers.len());
        for (i, &n) in frame_numbers.iter().enumerate() {
            buffer.write_frame(i, &[10, 30], &[0, 2], &FrameHeader::new(n, 1));
        }
        let shape = [2usize];
        TrainView::new(AcquisitionEpoch(1), sequence, &shape, &buffer).to_owned()
    }

    #[test]
    fn test_count_gaps() {
        assert_eq!(count_gaps(&[]), 0);
        assert_eq!(count_gaps(&[5]), 0);
        assert_eq!(count_gaps(&[1, 2, 3]), 0);
        assert_eq!(count_gaps(&[1, 4, 5, 7]), 3);
        // 回绕不计入
        assert_eq!(count_gaps(&[9, 2]), 0);
    }

    #[test]
    fn test_train_statistics() {
        let stats = TrainStatistics::from_train(&train(3, &[1, 2, 4]));
        assert_eq!(stats.sequence, 3);
        assert_eq!(stats.frames, 3);
        assert!((stats.adc_mean - 20.0).abs() < 1e-9);
        assert!(stats.adc_std_dev > 0.0);
        assert_eq!(stats.adc_min, 10);
        assert_eq!(stats.adc_max, 30);
        assert_eq!(stats.gain_histogram, [3, 0, 3, 0]);
        assert_eq!(stats.frame_gaps, 1);
        assert_eq!((stats.first_frame, stats.last_frame), (1, 4));
    }

    #[test]
    fn test_empty_train_statistics() {
        let stats = TrainStatistics::from_train(&train(0, &[]));
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.adc_mean, 0.0);
        assert_eq!(stats.adc_min, 0);
    }

    #[test]
    fn test_run_statistics_counts_gaps_between_trains() {
        let trains = [train(0, &[1, 2]), train(1, &[3, 4]), train(3, &[8, 9])];
        let run = RunStatistics::from_trains(&trains);

        assert_eq!(run.trains, 3);
        assert_eq!(run.frames, 6);
        assert_eq!(run.frame_gaps, 3);
        assert!((run.loss_rate() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(run.mean_frames_per_train(), 2.0);
        assert_eq!(run.frames_per_train_std_dev, 0.0);
        assert_eq!(run.gain_histogram, [6, 0, 6, 0]);
    }

    #[test]
    fn test_empty_run() {
        let run = RunStatistics::new();
        assert_eq!(run.loss_rate(), 0.0);
        assert_eq!(run.mean_frames_per_train(), 0.0);
    }

    #[test]
    fn test_sink_resets_per_epoch() {
        let mut sink = StatisticsSink::new();
        let handle = sink.handle();
        let mut buffer = TrainBuffer::new(2, 2);
        buffer.write_frame(0, &[1, 1], &[0, 0], &FrameHeader::new(1, 1));
        let shape = [2usize];

        sink.publish(&TrainView::new(AcquisitionEpoch(1), 0, &shape, &buffer)).unwrap();
        sink.publish(&TrainView::new(AcquisitionEpoch(1), 1, &shape, &buffer)).unwrap();
        assert_eq!(handle.lock().trains, 2);

        sink.publish(&TrainView::new(AcquisitionEpoch(2), 0, &shape, &buffer)).unwrap();
        assert_eq!(handle.lock().trains, 1);
    }
}
