//! 录制查看命令

use super::simulate::print_statistics;
use anyhow::{Context, Result};
use clap::Args;
use slsrx_tools::{RunStatistics, TrainRecording, TrainStatistics};
use std::path::PathBuf;

/// 查看命令参数
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// 录制文件路径
    pub input: PathBuf,

    /// 逐个 train 打印统计
    #[arg(short, long)]
    pub trains: bool,
}

impl InspectCommand {
    pub fn execute(&self) -> Result<()> {
        let recording = TrainRecording::load(&self.input)
            .with_context(|| format!("failed to inspect {}", self.input.display()))?;

        let metadata = &recording.metadata;
        println!("Recording: {}", self.input.display());
        println!("  format version:       {}", recording.version);
        println!("  detector:             {}", metadata.detector);
        println!("  frames per train:     {}", metadata.frames_per_train);
        println!("  platform:             {}", metadata.platform);
        println!("  started at:           {}", metadata.start_time);
        if !metadata.notes.is_empty() {
            println!("  notes:                {}", metadata.notes);
        }
        println!(
            "  trains:               {} ({} frames)",
            recording.train_count(),
            recording.frame_count()
        );

        for epoch in recording.epochs() {
            let run = recording.filter_by_epoch(epoch);
            println!("\nAcquisition {}", epoch);

            if self.trains {
                for train in &run.trains {
                    let stats = TrainStatistics::from_train(train);
                    println!(
                        "  train {:>6}: {:>4} frames [{}..={}] gaps {} ADC {:.1}±{:.1} [{}, {}]",
                        stats.sequence,
                        stats.frames,
                        stats.first_frame,
                        stats.last_frame,
                        stats.frame_gaps,
                        stats.adc_mean,
                        stats.adc_std_dev,
                        stats.adc_min,
                        stats.adc_max
                    );
                }
            }

            print_statistics(&RunStatistics::from_trains(&run.trains));
        }

        Ok(())
    }
}
