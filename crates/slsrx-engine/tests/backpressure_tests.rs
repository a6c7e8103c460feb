//! 背压与线程协作测试
//!
//! 验证：
//! 1. 发布线程阻塞时，组装器有界等待后丢弃最旧的未发送 train
//! 2. 采集线程与发布线程并发运行时不丢帧、不乱序
//! 3. 模拟探测器端到端驱动引擎
//! 4. 发布队列积压时每次采集仍各有一个结束信号

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use serial_test::serial;
use slsrx_engine::{
    AssemblerConfig, ChannelSink, EngineBuilder, OutputSink, SinkError, SinkEvent, TrainView,
};
use slsrx_protocol::{AcquisitionEpoch, AcquisitionParams, DetectorType, FrameHeader, MaskedDecoder};
use slsrx_source::{SimulatedDetector, SimulationConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const DETECTOR_SIZE: usize = 4;

fn decoder() -> MaskedDecoder {
    MaskedDecoder::new(DetectorType::Generic, &[DETECTOR_SIZE], 0x3FFF, 0xC000, 14).unwrap()
}

fn frame(frame_number: u64) -> Vec<u8> {
    let word = (frame_number as u16) & 0x3FFF;
    (0..DETECTOR_SIZE).flat_map(|_| word.to_le_bytes()).collect()
}

/// 第一次发布时阻塞，直到测试打开闸门
struct GateSink {
    gate: Receiver<()>,
    entered: Sender<()>,
    published: Arc<Mutex<Vec<(u64, Vec<u64>)>>>,
    calls: Arc<AtomicU64>,
}

impl OutputSink for GateSink {
    fn name(&self) -> &str {
        "gate"
    }

    fn publish(&mut self, train: &TrainView<'_>) -> Result<(), SinkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.entered.send(());
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
        }
        self.published
            .lock()
            .push((train.sequence(), train.frame_number().to_vec()));
        Ok(())
    }
}

fn wait_for_eos(events: &Receiver<SinkEvent>, epoch: AcquisitionEpoch) -> usize {
    let mut trains = 0;
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SinkEvent::Train(_)) => trains += 1,
            Ok(SinkEvent::EndOfStream(e)) if e == epoch => return trains,
            Ok(SinkEvent::EndOfStream(_)) => {},
            Err(e) => panic!("no end of stream received: {}", e),
        }
    }
}

#[test]
#[serial]
fn test_blocked_publisher_drops_oldest_unsent_train() {
    let (gate_tx, gate_rx) = bounded(1);
    let (entered_tx, entered_rx) = bounded(1);
    let published = Arc::new(Mutex::new(Vec::new()));
    let gate = GateSink {
        gate: gate_rx,
        entered: entered_tx,
        published: published.clone(),
        calls: Arc::new(AtomicU64::new(0)),
    };
    let (channel, events) = ChannelSink::new("after-gate", 64);

    let engine = EngineBuilder::new()
        .decoder(decoder())
        .config(AssemblerConfig {
            handoff_timeout_ms: 20,
            ..Default::default()
        })
        .sink(gate)
        .sink(channel)
        .build()
        .unwrap();

    let epoch = engine
        .start_acquisition(&AcquisitionParams::new(DETECTOR_SIZE, 2))
        .unwrap();
    let h = |n: u64, id: u64| FrameHeader::new(n, id).with_arrival_time(1.0);

    engine.ingest(epoch, &h(1, 1), &frame(1));
    // 新 ID：train 0 交给发布线程，发布线程卡在闸门上
    let outcome = engine.ingest(epoch, &h(2, 2), &frame(2));
    assert_eq!(outcome.report().unwrap().trains_handed_off, 1);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // 没有空闲缓冲区：有界等待后丢弃 train 1（帧 2）
    let start = Instant::now();
    let outcome = engine.ingest(epoch, &h(3, 3), &frame(3));
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.report().unwrap().trains_dropped, 1);
    assert_eq!(outcome.report().unwrap().written, 1);

    gate_tx.send(()).unwrap();
    engine.stop_acquisition(epoch, 3).unwrap();
    assert_eq!(wait_for_eos(&events, epoch), 2);

    let published = published.lock().clone();
    assert_eq!(published, vec![(0, vec![1]), (2, vec![3])]);

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.trains_dropped_backpressure, 1);
    assert_eq!(snapshot.frames_dropped_backpressure, 1);
    assert_eq!(snapshot.trains_published, 2);
}

#[test]
#[serial]
fn test_rapid_restarts_behind_blocked_publisher_keep_every_end_of_stream() {
    const CYCLES: u64 = 4;

    let (gate_tx, gate_rx) = bounded(1);
    let (entered_tx, entered_rx) = bounded(1);
    let gate = GateSink {
        gate: gate_rx,
        entered: entered_tx,
        published: Arc::new(Mutex::new(Vec::new())),
        calls: Arc::new(AtomicU64::new(0)),
    };
    let (channel, events) = ChannelSink::new("after-gate", 64);

    let engine = EngineBuilder::new()
        .decoder(decoder())
        .config(AssemblerConfig {
            handoff_timeout_ms: 20,
            publish_queue_capacity: 2,
            ..Default::default()
        })
        .sink(gate)
        .sink(channel)
        .build()
        .unwrap();

    // 闸门保持关闭超过停止时的交接超时
    let opener = thread::spawn(move || {
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(1500));
        gate_tx.send(()).unwrap();
    });

    let mut epochs = Vec::new();
    let mut results = Vec::new();
    for n in 1..=CYCLES {
        let epoch = engine
            .start_acquisition(&AcquisitionParams::new(DETECTOR_SIZE, 1))
            .unwrap();
        engine.ingest(epoch, &FrameHeader::new(n, n), &frame(n));
        results.push(engine.stop_acquisition(epoch, 1));
        epochs.push(epoch);
    }
    opener.join().unwrap();

    assert!(results.iter().all(|r| r.is_ok()), "stop results: {:?}", results);

    let mut delivered = Vec::new();
    while delivered.len() < epochs.len() {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SinkEvent::Train(_) => {},
            SinkEvent::EndOfStream(epoch) => delivered.push(epoch),
        }
    }
    assert_eq!(delivered, epochs);

    // 计数在所有输出端收到结束信号之后才累加
    let deadline = Instant::now() + Duration::from_secs(2);
    while engine.metrics().snapshot().end_of_streams < CYCLES && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(engine.metrics().snapshot().end_of_streams, CYCLES);
}

#[test]
#[serial]
fn test_producer_thread_concurrent_with_publisher() {
    const FRAMES: u64 = 3000;
    const FPT: usize = 5;

    let (channel, events) = ChannelSink::new("consumer", 4096);
    let engine = EngineBuilder::new()
        .decoder(decoder())
        .config(AssemblerConfig {
            handoff_timeout_ms: 2000,
            ..Default::default()
        })
        .sink(channel)
        .build()
        .unwrap();
    let handler = engine.handler();

    let producer = thread::spawn(move || {
        let epoch = handler
            .on_acquisition_start(&AcquisitionParams::new(DETECTOR_SIZE, FPT))
            .unwrap();
        for n in 1..=FRAMES {
            let id = 1 + (n - 1) / FPT as u64;
            handler.on_frame_ready(epoch, &FrameHeader::new(n, id), &frame(n));
        }
        handler.on_acquisition_stop(epoch, FRAMES);
        epoch
    });
    let epoch = producer.join().unwrap();

    let mut next_frame = 1;
    let mut trains = 0;
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SinkEvent::Train(train) => {
                assert_eq!(train.sequence, trains);
                assert_eq!(train.frames(), FPT);
                for (i, &n) in train.frame_number.iter().enumerate() {
                    assert_eq!(n, next_frame);
                    assert!(train.frame_adc(i).unwrap().iter().all(|&v| v as u64 == n & 0x3FFF));
                    next_frame += 1;
                }
                trains += 1;
            },
            SinkEvent::EndOfStream(e) => {
                assert_eq!(e, epoch);
                break;
            },
        }
    }

    assert_eq!(trains, FRAMES / FPT as u64);
    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.frames_written, FRAMES);
    assert_eq!(snapshot.drop_rate(), 0.0);
}

#[test]
#[serial]
fn test_simulated_detector_end_to_end() {
    let (channel, events) = ChannelSink::new("consumer", 256);
    let decoder = Arc::new(MaskedDecoder::gotthard());
    let engine = EngineBuilder::new()
        .shared_decoder(decoder.clone())
        .config(AssemblerConfig {
            handoff_timeout_ms: 2000,
            ..Default::default()
        })
        .sink(channel)
        .build()
        .unwrap();

    let config = SimulationConfig {
        period_us: 200,
        frames_per_train: 5,
        frames_per_correlation_id: 5,
        max_frames: Some(50),
        ..Default::default()
    };
    let mut detector = SimulatedDetector::new(config, decoder).unwrap();
    detector.start(engine.handler()).unwrap();
    assert!(detector.wait_finished(Duration::from_secs(10)));
    assert_eq!(detector.stop().unwrap(), 50);

    let epoch = engine.current_epoch();
    let mut trains = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SinkEvent::Train(train) => trains.push(train),
            SinkEvent::EndOfStream(e) => {
                assert_eq!(e, epoch);
                break;
            },
        }
    }

    assert_eq!(trains.len(), 10);
    for (i, train) in trains.iter().enumerate() {
        assert_eq!(train.frames(), 5);
        assert!(train.correlation_id.iter().all(|&c| c == i as u64 + 1));
        assert_eq!(train.display_shape, vec![1280]);
    }
    assert_eq!(engine.metrics().snapshot().frames_received, 50);
}

#[test]
#[serial]
fn test_drop_during_acquisition_flushes_and_joins() {
    let (channel, events) = ChannelSink::new("consumer", 16);
    let engine = EngineBuilder::new()
        .decoder(decoder())
        .sink(channel)
        .build()
        .unwrap();

    let epoch = engine
        .start_acquisition(&AcquisitionParams::new(DETECTOR_SIZE, 8))
        .unwrap();
    engine.ingest(epoch, &FrameHeader::new(1, 1), &frame(1));
    drop(engine);

    // Drop 结束采集：冲刷 + 结束信号都已送达
    let received: Vec<SinkEvent> = events.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert!(matches!(&received[0], SinkEvent::Train(t) if t.frames() == 1));
    assert_eq!(received[1], SinkEvent::EndOfStream(epoch));
}
