// End-to-end segment rotation tests over in-process capture and bus

mod common;

use common::*;
use segment_recorder::protocol::{EncodeType, LogRecord};
use std::time::Duration;

#[test]
fn test_two_streams_rotate_once() {
    let mut harness = Harness::start(two_stream_config());

    // One second at 20 fps fills segment 0
    harness.send_synced(1..=20);
    harness.wait_for_segment(1);

    harness.send_synced(21..=21);
    harness.wait_for_producer(0, 21);
    harness.wait_for_producer(1, 21);
    harness.wait_for_stream_segment(0, 1);
    harness.wait_for_stream_segment(1, 1);

    let (_, result) = harness.stop();
    result.unwrap();

    let seg0 = harness.segment_dir(0);
    let seg1 = harness.segment_dir(1);

    // Road has a primary and a secondary output, driver only a primary
    assert_eq!(entry_count(&seg0.join("fcamera.hevc")), 20);
    assert_eq!(entry_count(&seg0.join("qcamera.ts")), 20);
    assert_eq!(entry_count(&seg0.join("dcamera.hevc")), 20);
    assert_eq!(entry_count(&seg1.join("fcamera.hevc")), 1);
    assert_eq!(entry_count(&seg1.join("qcamera.ts")), 1);
    assert_eq!(entry_count(&seg1.join("dcamera.hevc")), 1);

    let road0 = encode_indexes(&seg0.join("rlog"), "road");
    assert_eq!(road0.len(), 40);
    assert!(road0.iter().all(|idx| idx.segment_num == 0 && idx.frame_id <= 20));
    assert_eq!(
        road0.iter().filter(|idx| idx.r#type == EncodeType::Downscaled).count(),
        20
    );

    let driver0 = encode_indexes(&seg0.join("rlog"), "driver");
    assert_eq!(driver0.len(), 20);
    let ids: Vec<u64> = driver0.iter().map(|idx| idx.segment_id).collect();
    assert_eq!(ids, (0..20).collect::<Vec<u64>>());

    let road1 = encode_indexes(&seg1.join("rlog"), "road");
    assert_eq!(road1.len(), 2);
    assert!(road1.iter().all(|idx| idx.frame_id == 21 && idx.segment_num == 1 && idx.segment_id == 0));
    let driver1 = encode_indexes(&seg1.join("rlog"), "driver");
    assert_eq!(driver1.len(), 1);
    assert_eq!(driver1[0].encode_id, 20);

    // Lock files are gone once the segments are closed
    assert!(!seg0.join("rlog.lock").exists());
    assert!(!seg1.join("rlog.lock").exists());
}

#[test]
fn test_frame_packets_logged_and_decimated() {
    let mut harness = Harness::start(two_stream_config());

    harness.send_synced(1..=5);
    harness.wait_for_producer(0, 5);
    harness.wait_for_producer(1, 5);
    common::wait_until(Duration::from_secs(5), || {
        let shared = harness.coordinator.shared();
        shared.snapshot(0).consumer_frame_id == 5 && shared.snapshot(1).consumer_frame_id == 5
    });

    let (_, result) = harness.stop();
    result.unwrap();

    let seg0 = harness.segment_dir(0);
    let frames = |path: &std::path::Path| {
        records(path)
            .into_iter()
            .filter(|r| matches!(r, LogRecord::Frame(_)))
            .count()
    };
    assert_eq!(frames(&seg0.join("rlog")), 10);
    // First packet of each decimated service
    assert_eq!(frames(&seg0.join("qlog")), 2);

    let qlog = common::records(&seg0.join("qlog"));
    assert!(qlog
        .iter()
        .all(|r| !matches!(r, LogRecord::EncodeIndex(_))));
}

#[test]
fn test_disconnected_stream_rejoins_next_segment() {
    let mut harness = Harness::start(two_stream_config());

    harness.send_frames(1, 1..=5);
    harness.wait_for_producer(1, 5);
    harness.feeds[1].unplug();
    common::wait_until(Duration::from_secs(5), || harness.coordinator.live_count() == 1);

    // Road keeps recording; driver goes silent and stops holding it back
    harness.send_frames(0, 1..=20);
    harness.wait_for_segment(1);
    harness.send_frames(0, 21..=21);
    harness.wait_for_stream_segment(0, 1);

    harness.feeds[1].plug();
    harness.send_frames(1, 6..=6);
    harness.wait_for_producer(1, 6);
    harness.wait_for_stream_segment(1, 1);

    let (_, result) = harness.stop();
    result.unwrap();

    let seg0 = harness.segment_dir(0);
    let seg1 = harness.segment_dir(1);
    assert_eq!(entry_count(&seg0.join("dcamera.hevc")), 5);
    assert_eq!(entry_count(&seg1.join("dcamera.hevc")), 1);
    assert_eq!(entry_count(&seg0.join("fcamera.hevc")), 20);
    assert!(entry_count(&seg1.join("fcamera.hevc")) >= 1);

    let driver1 = encode_indexes(&seg1.join("rlog"), "driver");
    assert_eq!(driver1.len(), 1);
    assert_eq!(driver1[0].frame_id, 6);
    assert_eq!(driver1[0].segment_num, 1);
}

#[test]
fn test_segment_numbers_are_gapless_on_wall_clock() {
    let mut config = two_stream_config();
    config.recorder.camera_patience_ms = 50;
    let mut harness = Harness::start(config);

    // No camera frames at all: segments roll on the wall clock
    harness.wait_for_segment(2);
    let (_, result) = harness.stop();
    result.unwrap();

    let mut numbers: Vec<u32> = std::fs::read_dir(&harness.root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("route--"))
                .and_then(|n| n.parse().ok())
        })
        .collect();
    numbers.sort_unstable();
    let expected: Vec<u32> = (0..numbers.len() as u32).collect();
    assert!(numbers.len() >= 3);
    assert_eq!(numbers, expected);
}
