//! 发布线程
//!
//! 单线程串行执行所有 `OutputSink::publish` 调用（strand），
//! 保证 train 按边界检测顺序发布，结束信号在同一队列中排在最后一个 train 之后。

use crate::metrics::EngineMetrics;
use crate::sink::{SinkSet, TrainView};
use crate::train_buffer::TrainBuffer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use slsrx_protocol::{AcquisitionEpoch, Shape};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 发布队列消息
pub enum PublisherMessage {
    /// 已完成的 train（缓冲区所有权随消息转移）
    Train {
        epoch: AcquisitionEpoch,
        sequence: u64,
        buffer: TrainBuffer,
        /// 发布完成后把复位的缓冲区送回池中
        return_to: Sender<TrainBuffer>,
    },
    /// 采集结束信号
    EndOfStream { epoch: AcquisitionEpoch },
}

/// 发布线程主循环
///
/// # 参数
/// - `rx`: 发布队列接收端
/// - `sinks`: 输出端集合（由本线程独占）
/// - `display_shape`: 解码器的 display 形状
/// - `is_running`: 运行标志（用于生命周期联动）
/// - `metrics`: 性能指标
/// - `poll_interval`: 检查运行标志的间隔
///
/// 退出前会处理完队列中剩余的消息，已交接的 train 和结束信号不会丢失。
pub fn publisher_loop(
    rx: Receiver<PublisherMessage>,
    mut sinks: SinkSet,
    display_shape: Shape,
    is_running: Arc<AtomicBool>,
    metrics: Arc<EngineMetrics>,
    poll_interval: Duration,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Publisher thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set publisher thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    debug!("Publisher thread started with sinks {:?}", sinks.names());

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Publisher thread: is_running flag is false, exiting");
            break;
        }

        match rx.recv_timeout(poll_interval) {
            Ok(message) => handle_message(message, &mut sinks, &display_shape, &metrics),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Publisher thread: channel disconnected");
                break;
            },
        }
    }

    let mut drained = 0;
    while let Ok(message) = rx.try_recv() {
        handle_message(message, &mut sinks, &display_shape, &metrics);
        drained += 1;
    }
    if drained > 0 {
        debug!("Publisher thread: drained {} pending messages on exit", drained);
    }

    trace!("Publisher thread: loop exited");
}

fn handle_message(
    message: PublisherMessage,
    sinks: &mut SinkSet,
    display_shape: &[usize],
    metrics: &EngineMetrics,
) {
    match message {
        PublisherMessage::Train {
            epoch,
            sequence,
            mut buffer,
            return_to,
        } => {
            let view = TrainView::new(epoch, sequence, display_shape, &buffer);
            trace!(
                "Publishing train {} of acquisition {} ({} frames)",
                sequence,
                epoch,
                view.frames()
            );
            let errors = sinks.publish_all(&view);
            metrics.publish_errors.fetch_add(errors, Ordering::Relaxed);
            metrics.trains_published.fetch_add(1, Ordering::Relaxed);

            buffer.reset();
            if return_to.try_send(buffer).is_err() {
                // 池已释放（上一次采集或引擎已关闭）
                trace!("Buffer pool gone, dropping buffer of train {}", sequence);
            }
        },
        PublisherMessage::EndOfStream { epoch } => {
            let errors = sinks.end_of_stream_all(epoch);
            metrics.publish_errors.fetch_add(errors, Ordering::Relaxed);
            metrics.end_of_streams.fetch_add(1, Ordering::Relaxed);
            if errors > 0 {
                warn!("End of stream for acquisition {} failed on {} sinks", epoch, errors);
            } else {
                debug!("End of stream delivered for acquisition {}", epoch);
            }
        },
    }
}
