//! 双缓冲池
//!
//! 每次采集恰好有两块 `TrainBuffer`。空闲缓冲区存放在一个容量为 2 的有界通道中：
//! 组装器从通道取出空闲缓冲区，发布线程在发布完成并 `reset()` 后通过
//! [`BufferPool::returner`] 把缓冲区送回。
//!
//! 缓冲区在任一时刻只属于一方（组装器、发布队列或发布线程），
//! 生产者不可能写入一块仍在被读取的缓冲区。

use crate::train_buffer::TrainBuffer;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;
use tracing::debug;

/// 池中缓冲区数量（双缓冲）
pub const POOL_SIZE: usize = 2;

/// 双缓冲池
pub struct BufferPool {
    free_tx: Sender<TrainBuffer>,
    free_rx: Receiver<TrainBuffer>,
    detector_size: usize,
    frames_per_train: usize,
}

impl BufferPool {
    /// 分配两块新缓冲区
    pub fn new(detector_size: usize, frames_per_train: usize) -> Self {
        Self::with_recycled(detector_size, frames_per_train, Vec::new())
    }

    /// 复用上一次采集归还的缓冲区，不足两块时补齐
    ///
    /// 复用的缓冲区会按新尺寸 `resize()`。
    pub fn with_recycled(
        detector_size: usize,
        frames_per_train: usize,
        recycled: Vec<TrainBuffer>,
    ) -> Self {
        let (free_tx, free_rx) = bounded(POOL_SIZE);
        let mut reused = 0;

        for mut buffer in recycled.into_iter().take(POOL_SIZE) {
            buffer.resize(detector_size, frames_per_train);
            // 容量为 POOL_SIZE，take() 保证不会满
            let _ = free_tx.try_send(buffer);
            reused += 1;
        }
        for _ in reused..POOL_SIZE {
            let _ = free_tx.try_send(TrainBuffer::new(detector_size, frames_per_train));
        }

        debug!(
            detector_size,
            frames_per_train,
            reused,
            "BufferPool created"
        );

        Self {
            free_tx,
            free_rx,
            detector_size,
            frames_per_train,
        }
    }

    /// 非阻塞获取空闲缓冲区
    pub fn try_acquire(&self) -> Option<TrainBuffer> {
        self.free_rx.try_recv().ok()
    }

    /// 有界等待获取空闲缓冲区（超时返回 None）
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<TrainBuffer> {
        self.free_rx.recv_timeout(timeout).ok()
    }

    /// 归还端（随 train 一起交给发布线程）
    pub fn returner(&self) -> Sender<TrainBuffer> {
        self.free_tx.clone()
    }

    /// 直接归还一块缓冲区（会先复位）
    pub fn release(&self, mut buffer: TrainBuffer) {
        buffer.reset();
        let _ = self.free_tx.try_send(buffer);
    }

    /// 当前空闲缓冲区数量
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// 取出所有空闲缓冲区（用于下一次采集复用）
    pub fn drain(&self) -> Vec<TrainBuffer> {
        self.free_rx.try_iter().collect()
    }

    pub fn detector_size(&self) -> usize {
        self.detector_size
    }

    pub fn frames_per_train(&self) -> usize {
        self.frames_per_train
    }
}
