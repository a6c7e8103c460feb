//! 模拟采集命令
//!
//! 用模拟探测器驱动接收引擎，输出到原始文件 / 录制 / 显示 / 统计

use super::config::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use slsrx_engine::{EngineBuilder, MetricsSnapshot};
use slsrx_protocol::{DetectorType, FrameDecoder, MaskedDecoder};
use slsrx_source::SimulatedDetector;
use slsrx_tools::{
    DisplayData, DisplaySink, RawFileSink, RecordingMetadata, RecordingSink, RunStatistics,
    StatisticsSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 显示通道容量
const DISPLAY_QUEUE: usize = 4;

/// 进度打印间隔
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// 模拟命令参数（未指定的项使用配置文件）
#[derive(Args, Debug, Default)]
pub struct SimulateCommand {
    /// 探测器类型（jungfrau, gotthard, gotthard2）
    #[arg(long)]
    pub detector: Option<DetectorType>,

    /// 每个 train 的帧数
    #[arg(long)]
    pub frames_per_train: Option<usize>,

    /// 帧周期（微秒）
    #[arg(long)]
    pub period_us: Option<u64>,

    /// 连续多少帧共享一个 bunch ID（0 表示不提供 ID）
    #[arg(long)]
    pub frames_per_id: Option<u64>,

    /// burst（存储单元）模式
    #[arg(long)]
    pub burst: bool,

    /// 起始存储单元
    #[arg(long)]
    pub storage_cell_start: Option<u8>,

    /// 运行时长（秒），0 表示直到 Ctrl-C 或达到帧数上限
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 发送指定帧数后结束
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// 原始文件目录（启用原始文件输出）
    #[arg(long)]
    pub raw_dir: Option<PathBuf>,

    /// 原始文件名前缀
    #[arg(long)]
    pub raw_name: Option<String>,

    /// 把 train 录制到文件
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// 每个 train 中送显示的帧序号
    #[arg(long)]
    pub display_frame: Option<usize>,
}

impl SimulateCommand {
    /// 把命令行参数合并到配置
    pub fn apply(&self, config: &mut CliConfig) {
        if let Some(detector) = self.detector {
            config.detector = detector;
        }
        if let Some(fpt) = self.frames_per_train {
            config.simulation.frames_per_train = fpt;
        }
        if let Some(period) = self.period_us {
            config.simulation.period_us = period;
        }
        if let Some(n) = self.frames_per_id {
            config.simulation.frames_per_correlation_id = n;
        }
        if self.burst {
            config.simulation.burst_mode = true;
        }
        if let Some(cell) = self.storage_cell_start {
            config.simulation.storage_cell_start = cell;
        }
        if self.max_frames.is_some() {
            config.simulation.max_frames = self.max_frames;
        }
        if self.raw_dir.is_some() {
            config.output.raw_dir = self.raw_dir.clone();
        }
        if let Some(name) = &self.raw_name {
            config.output.raw_name = name.clone();
        }
        if self.record.is_some() {
            config.output.record = self.record.clone();
        }
        if self.display_frame.is_some() {
            config.output.display_frame = self.display_frame;
        }
    }

    pub fn execute(&self, mut config: CliConfig) -> Result<()> {
        self.apply(&mut config);

        if self.duration == 0 && config.simulation.max_frames.is_none() {
            println!("Running until Ctrl-C (use --duration or --max-frames to stop automatically)");
        }

        let decoder: Arc<dyn FrameDecoder> = Arc::new(
            MaskedDecoder::for_detector(config.detector)
                .ok_or_else(|| anyhow::anyhow!("detector {} cannot be simulated", config.detector))?,
        );

        // 输出端
        let statistics = StatisticsSink::new();
        let run_statistics = statistics.handle();
        let mut builder = EngineBuilder::new()
            .shared_decoder(decoder.clone())
            .config(config.assembler.clone())
            .sink(statistics);

        if let Some(dir) = &config.output.raw_dir {
            println!("💾 Raw files: {}/{}_d0_f*.raw", dir.display(), config.output.raw_name);
            builder = builder.sink(RawFileSink::new(dir, config.output.raw_name.clone()));
        }

        if let Some(path) = &config.output.record {
            let metadata =
                RecordingMetadata::new(config.detector.as_str(), config.simulation.frames_per_train);
            builder = builder.sink(RecordingSink::new(metadata).save_to(path));
        }

        let display_thread = match config.output.display_frame {
            Some(index) => {
                let (sink, frames) = DisplaySink::new(index, DISPLAY_QUEUE);
                builder = builder.sink(sink);
                Some(
                    thread::Builder::new()
                        .name("slsrx-display".into())
                        .spawn(move || {
                            for frame in frames {
                                let kind = match &frame.data {
                                    DisplayData::Vector { adc, .. } => format!("vector[{}]", adc.len()),
                                    DisplayData::Image { adc, .. } => format!("image{:?}", adc.dim()),
                                };
                                debug!(
                                    "Display {} train {}: frame {} id {} {}",
                                    frame.epoch,
                                    frame.sequence,
                                    frame.frame_number,
                                    frame.correlation_id,
                                    kind
                                );
                            }
                        })
                        .context("failed to spawn display thread")?,
                )
            },
            None => None,
        };

        let engine = builder.build().context("failed to build receiver engine")?;
        let metrics = engine.metrics().clone();

        let mut detector = SimulatedDetector::new(config.simulation.clone(), decoder)
            .context("failed to create simulated detector")?;

        // Ctrl-C：只设置标志，由主循环结束采集
        let running = Arc::new(AtomicBool::new(true));
        let running_for_signal = running.clone();
        ctrlc::set_handler(move || {
            running_for_signal.store(false, Ordering::Release);
        })
        .context("failed to set Ctrl-C handler")?;

        println!(
            "⏳ Simulating {} ({} frames per train, period {} µs)...",
            config.detector, config.simulation.frames_per_train, config.simulation.period_us
        );
        detector.start(engine.handler()).context("failed to start acquisition")?;

        let start = Instant::now();
        let mut last_progress = Instant::now();
        loop {
            if detector.wait_finished(Duration::from_millis(50)) {
                info!("Frame limit reached");
                break;
            }
            if !running.load(Ordering::Acquire) {
                println!("\n⚠️  Interrupted");
                break;
            }
            if self.duration > 0 && start.elapsed() >= Duration::from_secs(self.duration) {
                println!("\n⏱️  Duration reached");
                break;
            }
            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                let rates = engine.rates();
                info!(
                    "{} frames sent, detector {:.1} Hz, receiver {:.1} Hz",
                    detector.frames_sent(),
                    rates.frame_rate_in,
                    rates.frame_rate_out
                );
                last_progress = Instant::now();
            }
        }

        let frames_sent = detector.stop().context("failed to stop acquisition")?;
        let elapsed = start.elapsed();

        // Drop 会等待发布线程处理完剩余 train
        drop(engine);
        if let Some(handle) = display_thread
            && handle.join().is_err()
        {
            warn!("Display thread panicked");
        }

        println!(
            "\n✅ Acquisition finished: {} frames in {:.2}s",
            frames_sent,
            elapsed.as_secs_f64()
        );
        print_metrics(&metrics.snapshot());
        print_statistics(&run_statistics.lock());
        if let Some(path) = &config.output.record {
            println!("💾 Recording saved to {}", path.display());
        }

        Ok(())
    }
}

pub fn print_metrics(snapshot: &MetricsSnapshot) {
    println!("Engine metrics:");
    println!("  frames received:      {}", snapshot.frames_received);
    println!("  frames written:       {}", snapshot.frames_written);
    println!("  overflow drops:       {}", snapshot.frames_dropped_overflow);
    println!("  stale drops:          {}", snapshot.frames_dropped_stale);
    println!("  decode failures:      {}", snapshot.frames_decode_failed);
    println!("  malformed payloads:   {}", snapshot.payloads_malformed);
    println!("  trains published:     {}", snapshot.trains_published);
    println!(
        "  backpressure drops:   {} trains ({} frames)",
        snapshot.trains_dropped_backpressure, snapshot.frames_dropped_backpressure
    );
    println!("  publish errors:       {}", snapshot.publish_errors);
    println!("  drop rate:            {:.2}%", snapshot.drop_rate());
}

pub fn print_statistics(stats: &RunStatistics) {
    println!("Run statistics:");
    println!("  trains:               {}", stats.trains);
    println!("  frames:               {}", stats.frames);
    println!(
        "  frames per train:     {:.2} (σ {:.2})",
        stats.mean_frames_per_train(),
        stats.frames_per_train_std_dev
    );
    println!("  frame gaps:           {}", stats.frame_gaps);
    println!("  loss rate:            {:.2}%", stats.loss_rate());
    println!("  mean ADC:             {:.1}", stats.adc_mean);
    println!("  gain histogram:       {:?}", stats.gain_histogram);
}
