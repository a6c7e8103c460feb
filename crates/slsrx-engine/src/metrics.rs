//! 引擎运行指标
//!
//! 零开销的原子计数器，用于监控组装与发布链路的健康状态。
//! 所有可恢复的异常（格式错误、溢出、背压丢弃等）只体现在这里和日志中。

use std::sync::atomic::{AtomicU64, Ordering};

/// 引擎实时指标
///
/// # 使用示例
///
/// ```rust
/// use slsrx_engine::EngineMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(EngineMetrics::default());
/// metrics.frames_received.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.frames_received, 1);
/// ```
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// 通过格式校验的帧数（含之后被丢弃的）
    pub frames_received: AtomicU64,
    /// 成功写入缓冲区的帧数
    pub frames_written: AtomicU64,
    /// 缓冲区已满而丢弃的帧数
    pub frames_dropped_overflow: AtomicU64,
    /// 纪元过期或非采集状态而拒绝的帧数
    pub frames_dropped_stale: AtomicU64,
    /// 解码失败而跳过的帧数
    pub frames_decode_failed: AtomicU64,
    /// 字节数不合法而整体丢弃的回调负载数
    pub payloads_malformed: AtomicU64,
    /// 交给发布队列的 train 数
    pub trains_handed_off: AtomicU64,
    /// 发布线程完成发布的 train 数
    pub trains_published: AtomicU64,
    /// 发布积压超时而丢弃的 train 数
    pub trains_dropped_backpressure: AtomicU64,
    /// 背压丢弃的 train 中包含的帧数
    pub frames_dropped_backpressure: AtomicU64,
    /// 输出端发布失败次数（按输出端计）
    pub publish_errors: AtomicU64,
    /// 已发出的结束信号数
    pub end_of_streams: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取（`Ordering::Relaxed`），计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped_overflow: self.frames_dropped_overflow.load(Ordering::Relaxed),
            frames_dropped_stale: self.frames_dropped_stale.load(Ordering::Relaxed),
            frames_decode_failed: self.frames_decode_failed.load(Ordering::Relaxed),
            payloads_malformed: self.payloads_malformed.load(Ordering::Relaxed),
            trains_handed_off: self.trains_handed_off.load(Ordering::Relaxed),
            trains_published: self.trains_published.load(Ordering::Relaxed),
            trains_dropped_backpressure: self.trains_dropped_backpressure.load(Ordering::Relaxed),
            frames_dropped_backpressure: self.frames_dropped_backpressure.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            end_of_streams: self.end_of_streams.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_dropped_overflow.store(0, Ordering::Relaxed);
        self.frames_dropped_stale.store(0, Ordering::Relaxed);
        self.frames_decode_failed.store(0, Ordering::Relaxed);
        self.payloads_malformed.store(0, Ordering::Relaxed);
        self.trains_handed_off.store(0, Ordering::Relaxed);
        self.trains_published.store(0, Ordering::Relaxed);
        self.trains_dropped_backpressure.store(0, Ordering::Relaxed);
        self.frames_dropped_backpressure.store(0, Ordering::Relaxed);
        self.publish_errors.store(0, Ordering::Relaxed);
        self.end_of_streams.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_written: u64,
    pub frames_dropped_overflow: u64,
    pub frames_dropped_stale: u64,
    pub frames_decode_failed: u64,
    pub payloads_malformed: u64,
    pub trains_handed_off: u64,
    pub trains_published: u64,
    pub trains_dropped_backpressure: u64,
    pub frames_dropped_backpressure: u64,
    pub publish_errors: u64,
    pub end_of_streams: u64,
}

impl MetricsSnapshot {
    /// 丢帧率（百分比）
    ///
    /// 以已接收帧为基数，统计溢出、解码失败和背压丢弃的帧。`frames_received` 为 0 时返回 0.0。
    pub fn drop_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        let dropped = self.frames_dropped_overflow
            + self.frames_decode_failed
            + self.frames_dropped_backpressure;
        (dropped as f64 / self.frames_received as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = EngineMetrics::new();
        metrics.frames_received.fetch_add(10, Ordering::Relaxed);
        metrics.frames_dropped_overflow.fetch_add(2, Ordering::Relaxed);
        metrics.trains_published.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 10);
        assert_eq!(snapshot.trains_published, 1);
        assert_eq!(snapshot.drop_rate(), 20.0);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_drop_rate_empty() {
        assert_eq!(MetricsSnapshot::default().drop_rate(), 0.0);
    }
}
