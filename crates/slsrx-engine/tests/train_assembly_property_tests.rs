//! Train 组装属性测试（proptest）

use crossbeam_channel::Receiver;
use proptest::prelude::*;
use slsrx_engine::{
    AssemblerConfig, ChannelSink, EngineBuilder, OwnedTrain, ReceiverEngine, SinkEvent,
};
use slsrx_protocol::{AcquisitionEpoch, AcquisitionParams, DetectorType, FrameHeader, MaskedDecoder};
use std::collections::HashSet;
use std::time::Duration;

const DETECTOR_SIZE: usize = 2;
const FRAME_BYTES: usize = DETECTOR_SIZE * 2;

fn engine() -> (ReceiverEngine, Receiver<SinkEvent>) {
    let decoder =
        MaskedDecoder::new(DetectorType::Generic, &[DETECTOR_SIZE], 0x3FFF, 0xC000, 14).unwrap();
    let (sink, events) = ChannelSink::new("prop", 4096);
    let engine = EngineBuilder::new()
        .decoder(decoder)
        .config(AssemblerConfig {
            handoff_timeout_ms: 2000,
            ..Default::default()
        })
        .sink(sink)
        .build()
        .unwrap();
    (engine, events)
}

fn frame(frame_number: u64) -> Vec<u8> {
    let word = (frame_number as u16) & 0x3FFF;
    (0..DETECTOR_SIZE).flat_map(|_| word.to_le_bytes()).collect()
}

fn run(engine: &ReceiverEngine, fpt: usize, ids: &[u64]) -> (AcquisitionEpoch, u64) {
    let epoch = engine
        .start_acquisition(&AcquisitionParams::new(DETECTOR_SIZE, fpt))
        .unwrap();
    for (i, &id) in ids.iter().enumerate() {
        let n = i as u64 + 1;
        engine.ingest(epoch, &FrameHeader::new(n, id).with_arrival_time(1.0), &frame(n));
    }
    engine.stop_acquisition(epoch, ids.len() as u64).unwrap();
    (epoch, ids.len() as u64)
}

fn collect_until_eos(events: &Receiver<SinkEvent>) -> Vec<OwnedTrain> {
    let mut trains = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SinkEvent::Train(train)) => trains.push(train),
            Ok(SinkEvent::EndOfStream(_)) => return trains,
            Err(e) => panic!("no end of stream received: {}", e),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// 任意 ID 序列：每个 train 非空且不超过容量，没有帧被写两次
    #[test]
    fn prop_bounded_occupancy_and_no_double_write(
        fpt in 1usize..6,
        ids in prop::collection::vec(0u64..6, 1..60),
    ) {
        let (engine, events) = engine();
        run(&engine, fpt, &ids);
        let trains = collect_until_eos(&events);

        let mut seen = HashSet::new();
        let mut total = 0;
        for train in &trains {
            prop_assert!(train.frames() >= 1);
            prop_assert!(train.frames() <= fpt);
            prop_assert_eq!(train.adc.len(), train.frames() * DETECTOR_SIZE);
            for &n in &train.frame_number {
                prop_assert!(seen.insert(n), "frame {} published twice", n);
            }
            total += train.frames() as u64;
        }

        let snapshot = engine.metrics().snapshot();
        prop_assert_eq!(snapshot.frames_written, total);
        prop_assert_eq!(
            snapshot.frames_written + snapshot.frames_dropped_overflow,
            ids.len() as u64
        );
    }

    /// 严格递增的 ID（每个 ID 重复若干次）：每个不同的 ID 恰好开始一个 train
    #[test]
    fn prop_each_increasing_id_starts_one_train(
        fpt in 1usize..6,
        groups in prop::collection::vec((1u64..4, 1usize..8), 1..12),
    ) {
        let mut ids = Vec::new();
        let mut id = 0;
        for &(step, repeat) in &groups {
            id += step;
            ids.extend(std::iter::repeat_n(id, repeat));
        }

        let (engine, events) = engine();
        run(&engine, fpt, &ids);
        let trains = collect_until_eos(&events);

        prop_assert_eq!(trains.len(), groups.len());
        for (train, &(_, repeat)) in trains.iter().zip(&groups) {
            prop_assert_eq!(train.frames(), repeat.min(fpt));
            let first = train.correlation_id[0];
            prop_assert!(train.correlation_id.iter().all(|&c| c == first));
        }
    }

    /// 计数回退：ID 恒为 0 时每 N 帧切一次
    #[test]
    fn prop_counting_mode_cuts_every_n(fpt in 1usize..8, frames in 1usize..50) {
        let (engine, events) = engine();
        run(&engine, fpt, &vec![0; frames]);
        let trains = collect_until_eos(&events);

        prop_assert_eq!(trains.len(), frames.div_ceil(fpt));
        for train in &trains[..trains.len() - 1] {
            prop_assert_eq!(train.frames(), fpt);
        }
    }

    /// 字节数不是帧大小整数倍的负载永远不会改变缓冲区
    #[test]
    fn prop_malformed_byte_count_never_mutates(len in 0usize..64) {
        prop_assume!(len == 0 || len % FRAME_BYTES != 0);

        let (engine, _events) = engine();
        let epoch = engine
            .start_acquisition(&AcquisitionParams::new(DETECTOR_SIZE, 4))
            .unwrap();
        engine.ingest(epoch, &FrameHeader::new(1, 1), &frame(1));

        let raw = vec![0xAB; len];
        let outcome = engine.ingest(epoch, &FrameHeader::new(2, 2), &raw);
        prop_assert!(!outcome.is_accepted());
        prop_assert_eq!(engine.assembler().active_frames(), Some(1));
        prop_assert_eq!(engine.metrics().snapshot().frames_written, 1);
    }
}
