//! 引擎配置
//!
//! `AssemblerConfig` 是纯数据（POD），可序列化到 TOML；运行时组件（解码器、
//! 输出）由 [`EngineBuilder`](crate::EngineBuilder) 注入。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 组装器配置
///
/// # Example
///
/// ```
/// use slsrx_engine::AssemblerConfig;
///
/// // 默认配置（50ms 交接等待，每次采集最多 10 条警告）
/// let config = AssemblerConfig::default();
/// assert_eq!(config.handoff_timeout_ms, 50);
///
/// let config = AssemblerConfig {
///     handoff_timeout_ms: 5,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// 交换缓冲区时等待空闲缓冲区的最长时间（毫秒）
    ///
    /// 超时后丢弃当前已满的 train（最旧的未发送 train）并复用其缓冲区，
    /// 不会无限期阻塞采集线程。
    pub handoff_timeout_ms: u64,
    /// 每次采集最多输出的警告条数，之后只累加计数
    pub max_warnings_per_acquisition: u32,
    /// 发布队列容量（train + 结束信号）
    pub publish_queue_capacity: usize,
    /// 发布线程检查退出标志的间隔（毫秒）
    pub publisher_poll_interval_ms: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            handoff_timeout_ms: 50,
            max_warnings_per_acquisition: 10,
            publish_queue_capacity: 4,
            publisher_poll_interval_ms: 100,
        }
    }
}

impl AssemblerConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn publisher_poll_interval(&self) -> Duration {
        Duration::from_millis(self.publisher_poll_interval_ms.max(1))
    }

    /// 检查配置是否有效
    pub fn validate(&self) -> Result<(), String> {
        if self.publish_queue_capacity == 0 {
            return Err("publish_queue_capacity must be > 0".to_string());
        }
        if self.publisher_poll_interval_ms == 0 {
            return Err("publisher_poll_interval_ms must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssemblerConfig::default();
        assert_eq!(config.max_warnings_per_acquisition, 10);
        assert_eq!(config.handoff_timeout(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = AssemblerConfig {
            publish_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AssemblerConfig = serde_json::from_str(r#"{"handoff_timeout_ms": 7}"#).unwrap();
        assert_eq!(config.handoff_timeout_ms, 7);
        assert_eq!(config.publish_queue_capacity, 4);
    }
}
