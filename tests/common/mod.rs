// Shared harness for recorder integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use segment_recorder::capture::{ChannelCaptureSource, FrameSender};
use segment_recorder::config::{RecorderConfig, ServiceConfig, StreamConfig};
use segment_recorder::demux;
use segment_recorder::protocol::{CompressionLevel, CompressionType, EncodeIndex, LogRecord};
use segment_recorder::storage::{read_entries, FilesystemLogger, LoggerOptions};
use segment_recorder::{
    CancellationToken, FileEncoderFactory, Recorder, RecorderError, RotationCoordinator,
};
use tempfile::TempDir;

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 4;

/// Road stream with a downscaled secondary output, driver stream without
pub fn two_stream_config() -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.storage.compression.r#type = CompressionType::None;

    let settings = &mut config.recorder;
    settings.segment_length_seconds = 1;
    settings.poll_interval_ms = 10;
    settings.camera_patience_ms = 500;
    settings.capture_retry_ms = 10;
    settings.frame_timeout_ms = 100;
    settings.streams = vec![
        StreamConfig::new("road", "frame", "fcamera.hevc").with_secondary("qcamera.ts", 4, 2),
        StreamConfig::new("driver", "frontFrame", "dcamera.hevc"),
    ];

    config.services = vec![
        ServiceConfig {
            name: "frame".to_string(),
            decimation: Some(20),
        },
        ServiceConfig {
            name: "frontFrame".to_string(),
            decimation: Some(20),
        },
    ];
    config
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub coordinator: RotationCoordinator,
    pub cancel: CancellationToken,
    pub feeds: Vec<FrameSender>,
    pub events: demux::EventSender,
    handle: Option<JoinHandle<Result<(), RecorderError>>>,
}

impl Harness {
    /// Start a recorder over `config` with one channel feed per stream.
    /// The config's log root is replaced by a fresh temp dir.
    pub fn start(mut config: RecorderConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("realdata");
        config.storage.log_root = root.display().to_string();

        let (events, demuxer) = demux::channel();
        let capture = ChannelCaptureSource::new();
        let feeds = config
            .recorder
            .streams
            .iter()
            .map(|s| {
                capture
                    .feed(&s.name, WIDTH, HEIGHT)
                    .with_events(events.clone(), &s.frame_service)
            })
            .collect();

        let options = LoggerOptions {
            root: root.clone(),
            log_name: "rlog".to_string(),
            write_qlog: true,
            compression: CompressionType::None,
            level: CompressionLevel::Default,
        };
        let logger = FilesystemLogger::with_route(options, "route".to_string(), b"init".to_vec()).unwrap();
        let encoders = FileEncoderFactory::new(CompressionType::None, CompressionLevel::Default);

        let mut recorder = Recorder::new(
            &config,
            Arc::new(logger),
            Arc::new(capture),
            Arc::new(encoders),
            Box::new(demuxer),
        );
        let coordinator = recorder.coordinator().clone();
        let cancel = recorder.cancel_token();
        let handle = std::thread::spawn(move || recorder.run());

        let harness = Self {
            temp_dir,
            root,
            coordinator,
            cancel,
            feeds,
            events,
            handle: Some(handle),
        };
        harness.wait_for_segment(0);
        harness
    }

    pub fn wait_for_segment(&self, number: u32) {
        wait_until(Duration::from_secs(5), || {
            self.coordinator
                .current_segment()
                .is_some_and(|s| s.number >= number)
        });
    }

    /// Wait until `stream` has produced `frame_id`
    pub fn wait_for_producer(&self, stream: usize, frame_id: u64) {
        wait_until(Duration::from_secs(5), || {
            self.coordinator.shared().snapshot(stream).producer_frame_id >= frame_id
        });
    }

    /// Wait until `stream` has its outputs open on `segment`
    pub fn wait_for_stream_segment(&self, stream: usize, segment: u32) {
        wait_until(Duration::from_secs(5), || {
            self.coordinator.shared().snapshot(stream).segment == Some(segment)
        });
    }

    pub fn send_frames(&self, stream: usize, ids: std::ops::RangeInclusive<u64>) {
        for id in ids {
            assert!(self.feeds[stream].send(id));
        }
    }

    /// Send `ids` to every stream, frame by frame, the way synced cameras
    /// deliver them
    pub fn send_synced(&self, ids: std::ops::RangeInclusive<u64>) {
        for id in ids {
            for feed in &self.feeds {
                assert!(feed.send(id));
            }
        }
    }

    pub fn segment_dir(&self, number: u32) -> PathBuf {
        self.root.join(format!("route--{}", number))
    }

    /// Cancel the recorder and wait for it; returns how long that took.
    pub fn stop(&mut self) -> (Duration, Result<(), RecorderError>) {
        let started = Instant::now();
        self.cancel.cancel();
        let result = self.handle.take().unwrap().join().unwrap();
        (started.elapsed(), result)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(Instant::now() < deadline, "timed out after {:?}", timeout);
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn records(path: &Path) -> Vec<LogRecord> {
    read_entries(path)
        .unwrap()
        .iter()
        .filter_map(|entry| LogRecord::from_bytes(entry).ok())
        .collect()
}

pub fn encode_indexes(path: &Path, stream: &str) -> Vec<EncodeIndex> {
    records(path)
        .into_iter()
        .filter_map(|r| match r {
            LogRecord::EncodeIndex(idx) if idx.stream == stream => Some(idx),
            _ => None,
        })
        .collect()
}

pub fn entry_count(path: &Path) -> usize {
    read_entries(path).unwrap().len()
}
