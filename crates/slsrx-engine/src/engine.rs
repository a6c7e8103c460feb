//! 接收引擎门面
//!
//! `ReceiverEngine` 持有组装器和发布线程，负责它们的生命周期：
//! Drop 时先结束仍在进行的采集（冲刷 + 结束信号），再通知发布线程退出并有界等待。

use crate::assembler::{AssemblerState, IngestOutcome, TrainAssembler};
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::rate::RateSnapshot;
use slsrx_protocol::{AcquisitionEpoch, AcquisitionParams, FrameHeader};
use slsrx_source::AcquisitionHandler;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{error, info, warn};

/// 带超时的 thread join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程代为 join，本线程只做有界等待
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 接收引擎
///
/// 通过 [`EngineBuilder`](crate::EngineBuilder) 构造。
///
/// # Example
///
/// ```
/// use slsrx_engine::{ChannelSink, EngineBuilder, SinkEvent};
/// use slsrx_protocol::{AcquisitionParams, FrameHeader, MaskedDecoder};
///
/// let (sink, events) = ChannelSink::new("consumer", 8);
/// let engine = EngineBuilder::new()
///     .decoder(MaskedDecoder::gotthard())
///     .sink(sink)
///     .build()
///     .unwrap();
///
/// let epoch = engine
///     .start_acquisition(&AcquisitionParams::new(1280, 2))
///     .unwrap();
/// let frame = vec![0u8; 1280 * 2];
/// engine.ingest(epoch, &FrameHeader::new(1, 1), &frame);
/// engine.stop_acquisition(epoch, 1).unwrap();
///
/// assert!(matches!(events.recv().unwrap(), SinkEvent::Train(t) if t.frames() == 1));
/// assert!(matches!(events.recv().unwrap(), SinkEvent::EndOfStream(_)));
/// ```
pub struct ReceiverEngine {
    assembler: Arc<TrainAssembler>,
    metrics: Arc<EngineMetrics>,
    is_running: Arc<AtomicBool>,
    publisher_thread: Option<JoinHandle<()>>,
}

impl ReceiverEngine {
    pub(crate) fn new(
        assembler: Arc<TrainAssembler>,
        metrics: Arc<EngineMetrics>,
        is_running: Arc<AtomicBool>,
        publisher_thread: JoinHandle<()>,
    ) -> Self {
        Self {
            assembler,
            metrics,
            is_running,
            publisher_thread: Some(publisher_thread),
        }
    }

    /// 采集库回调接口（交给帧源）
    pub fn handler(&self) -> Arc<dyn AcquisitionHandler> {
        self.assembler.clone()
    }

    pub fn assembler(&self) -> &Arc<TrainAssembler> {
        &self.assembler
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// 最新帧率样本
    pub fn rates(&self) -> RateSnapshot {
        self.assembler.rates()
    }

    pub fn state(&self) -> AssemblerState {
        self.assembler.state()
    }

    pub fn current_epoch(&self) -> AcquisitionEpoch {
        self.assembler.current_epoch()
    }

    /// 发布线程是否仍在运行
    pub fn is_publisher_alive(&self) -> bool {
        self.publisher_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn start_acquisition(
        &self,
        params: &AcquisitionParams,
    ) -> Result<AcquisitionEpoch, EngineError> {
        self.assembler.start_acquisition(params)
    }

    pub fn ingest(&self, epoch: AcquisitionEpoch, header: &FrameHeader, raw: &[u8]) -> IngestOutcome {
        self.assembler.ingest(epoch, header, raw)
    }

    pub fn stop_acquisition(
        &self,
        epoch: AcquisitionEpoch,
        total_frames_seen: u64,
    ) -> Result<(), EngineError> {
        self.assembler.stop_acquisition(epoch, total_frames_seen)
    }
}

impl Drop for ReceiverEngine {
    fn drop(&mut self) {
        if self.assembler.state() != AssemblerState::Idle {
            let epoch = self.assembler.current_epoch();
            warn!("Engine dropped during acquisition {}, stopping it", epoch);
            if let Err(e) = self.assembler.stop_acquisition(epoch, 0) {
                warn!("Failed to stop acquisition {} on drop: {}", epoch, e);
            }
        }

        // Release: All writes before this are visible to threads that see the false value
        self.is_running.store(false, Ordering::Release);

        let join_timeout = Duration::from_secs(2);
        if let Some(handle) = self.publisher_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Publisher thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        info!("Receiver engine shut down: {:?}", self.metrics.snapshot());
    }
}
