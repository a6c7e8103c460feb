//! 每次采集限量的警告日志

use std::fmt;
use tracing::warn;

/// 达到上限后输出的最后一条提示
pub const SUPPRESSION_NOTICE: &str = "No more messages will be logged for this acquisition.";

/// 警告限流器
///
/// 每次采集最多输出 `max` 条警告，第 `max + 1` 条替换为一次性提示，
/// 之后只累加被抑制的条数。每次采集开始时创建新的限流器。
#[derive(Debug, Clone)]
pub struct WarnLimiter {
    max: u32,
    emitted: u32,
    suppressed: u64,
}

impl WarnLimiter {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            emitted: 0,
            suppressed: 0,
        }
    }

    /// 输出一条警告（返回是否真正输出了该消息）
    pub fn warn(&mut self, message: fmt::Arguments<'_>) -> bool {
        if self.emitted < self.max {
            warn!("{}", message);
            self.emitted += 1;
            true
        } else {
            if self.emitted == self.max {
                warn!("{}", SUPPRESSION_NOTICE);
                self.emitted += 1;
            }
            self.suppressed += 1;
            false
        }
    }

    /// 被抑制的警告条数
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

/// `WarnLimiter::warn` 的格式化简写
#[macro_export]
macro_rules! limited_warn {
    ($limiter:expr, $($arg:tt)+) => {
        $limiter.warn(format_args!($($arg)+))
    };
}
