//! 帧率统计
//!
//! 按约 1 秒的窗口，根据帧号差值计算探测器帧率（rate in），根据窗口内
//! 处理的帧数计算接收端帧率（rate out）。
//!
//! 仅用于遥测：时钟回退等异常只影响上报数值（跳过该样本），不影响组装逻辑。

use tracing::debug;

/// 统计窗口长度（秒）
pub const RATE_WINDOW_SECS: f64 = 1.0;

/// 帧率快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateSnapshot {
    /// 探测器帧率（Hz）
    pub frame_rate_in: f64,
    /// 接收端帧率（Hz）
    pub frame_rate_out: f64,
    /// 采样时刻（秒）
    pub sampled_at: f64,
}

/// 帧率跟踪器
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    last_rate_time: f64,
    last_frame_number: u64,
    frames_since_last: u64,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次回调
    ///
    /// # 参数
    ///
    /// - `frame_number`: 当前帧号
    /// - `frames`: 本次回调中的帧数
    /// - `now`: 当前时间（秒）
    ///
    /// # 返回
    ///
    /// 窗口结束时返回新的帧率样本，否则返回 None。
    pub fn record(&mut self, frame_number: u64, frames: u64, now: f64) -> Option<RateSnapshot> {
        self.frames_since_last += frames;

        if self.last_frame_number == 0 {
            // 第一帧：只建立基准
            self.last_rate_time = now;
            self.last_frame_number = frame_number;
            return None;
        }

        let elapsed = now - self.last_rate_time;
        if elapsed < 0.0 {
            // 时钟回退：跳过该样本
            return None;
        }

        if elapsed > RATE_WINDOW_SECS && frame_number > self.last_frame_number {
            let sample = RateSnapshot {
                frame_rate_in: (frame_number - self.last_frame_number) as f64 / elapsed,
                frame_rate_out: self.frames_since_last as f64 / elapsed,
                sampled_at: now,
            };

            debug!(
                "Current frame: {} last frame: {} elapsed time [s]: {:.3}",
                frame_number, self.last_frame_number, elapsed
            );
            debug!("Frame rate (detector) {:.1} Hz", sample.frame_rate_in);
            debug!("Frame rate (receiver) {:.1} Hz", sample.frame_rate_out);

            self.frames_since_last = 0;
            self.last_rate_time = now;
            self.last_frame_number = frame_number;
            return Some(sample);
        }

        None
    }

    /// 采集结束：返回最后一个窗口的接收端帧率，并复位
    pub fn finish(&mut self, now: f64) -> Option<f64> {
        let elapsed = now - self.last_rate_time;
        let rate = (self.frames_since_last > 0 && self.last_frame_number != 0 && elapsed > 0.0)
            .then(|| self.frames_since_last as f64 / elapsed);

        if let Some(rate) = rate {
            debug!("Frame rate (receiver) {:.1} Hz at end of acquisition", rate);
        }

        *self = Self::default();
        rate
    }

    pub fn frames_since_last(&self) -> u64 {
        self.frames_since_last
    }
}
