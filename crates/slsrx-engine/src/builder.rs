//! Builder 模式实现
//!
//! 提供链式构造 `ReceiverEngine` 实例的便捷方式。

use crate::assembler::TrainAssembler;
use crate::config::AssemblerConfig;
use crate::engine::ReceiverEngine;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::publisher::publisher_loop;
use crate::sink::{OutputSink, SinkSet};
use crossbeam_channel::bounded;
use slsrx_protocol::FrameDecoder;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// Engine Builder（链式构造）
///
/// # Example
///
/// ```
/// use slsrx_engine::{AssemblerConfig, ChannelSink, EngineBuilder};
/// use slsrx_protocol::MaskedDecoder;
///
/// let (sink, _events) = ChannelSink::new("consumer", 16);
/// let engine = EngineBuilder::new()
///     .decoder(MaskedDecoder::jungfrau())
///     .config(AssemblerConfig {
///         handoff_timeout_ms: 20,
///         ..Default::default()
///     })
///     .sink(sink)
///     .build()
///     .unwrap();
/// assert!(engine.is_publisher_alive());
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    decoder: Option<Arc<dyn FrameDecoder>>,
    config: Option<AssemblerConfig>,
    sinks: SinkSet,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置解码器（必需）
    pub fn decoder(mut self, decoder: impl FrameDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// 设置共享的解码器
    pub fn shared_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// 设置组装器配置（默认 `AssemblerConfig::default()`）
    pub fn config(mut self, config: AssemblerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 添加输出端（按添加顺序调用）
    pub fn sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.sinks.add(Box::new(sink));
        self
    }

    pub fn boxed_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sinks.add(sink);
        self
    }

    /// 构建引擎并启动发布线程
    ///
    /// # 错误
    ///
    /// - 未设置解码器: [`EngineError::MissingDecoder`]
    /// - 配置无效: [`EngineError::InvalidConfig`]
    /// - 线程创建失败: [`EngineError::Io`]
    pub fn build(self) -> Result<ReceiverEngine, EngineError> {
        let decoder = self.decoder.ok_or(EngineError::MissingDecoder)?;
        let config = self.config.unwrap_or_default();
        config.validate().map_err(EngineError::InvalidConfig)?;

        let (publish_tx, publish_rx) = bounded(config.publish_queue_capacity);
        let metrics = Arc::new(EngineMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let display_shape = decoder.display_shape();
        let poll_interval = config.publisher_poll_interval();
        let sinks = self.sinks;
        let sink_count = sinks.len();

        let thread_metrics = metrics.clone();
        let thread_running = is_running.clone();
        let publisher_thread = std::thread::Builder::new()
            .name("slsrx-publisher".into())
            .spawn(move || {
                publisher_loop(
                    publish_rx,
                    sinks,
                    display_shape,
                    thread_running,
                    thread_metrics,
                    poll_interval,
                )
            })?;

        info!(
            "Receiver engine ready: {} decoder, display shape {:?}, {} sinks",
            decoder.detector_type(),
            decoder.display_shape(),
            sink_count
        );

        let assembler = Arc::new(TrainAssembler::new(
            decoder,
            config,
            publish_tx,
            metrics.clone(),
        ));
        Ok(ReceiverEngine::new(
            assembler,
            metrics,
            is_running,
            publisher_thread,
        ))
    }
}
