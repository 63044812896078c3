// Configuration loading tests

use std::io::Write;
use std::path::Path;

use segment_recorder::config::{load_config, ConfigLoader, RecorderConfig, StreamConfig};
use segment_recorder::protocol::CompressionType;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.yaml");
    let config = load_config(&path).unwrap();

    assert_eq!(config.storage.compression.r#type, CompressionType::Zstd);
    assert_eq!(config.storage.compression.level, 2);

    let names: Vec<&str> = config.recorder.streams.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["road", "driver", "wide"]);
    assert!(!config.recorder.streams[2].enabled);

    let road = &config.recorder.streams[0];
    let secondary = road.secondary.as_ref().unwrap();
    assert_eq!(secondary.filename, "qcamera.ts");
    assert_eq!((secondary.width, secondary.height), (526, 330));
    assert!(config.recorder.streams[1].secondary.is_none());
    assert_eq!(
        *road,
        StreamConfig::new("road", "frame", "fcamera.hevc").with_secondary("qcamera.ts", 526, 330)
    );

    let can = config.services.iter().find(|s| s.name == "can").unwrap();
    assert_eq!(can.decimation, None);
    let device = config.services.iter().find(|s| s.name == "deviceState").unwrap();
    assert_eq!(device.decimation, Some(2));

    ConfigLoader::validate(&config).unwrap();
}

#[test]
fn test_env_substitution_in_file() {
    std::env::set_var("SEGREC_TEST_ROOT", "/mnt/logs");
    let file = write_config(
        r#"
storage:
  log_root: ${SEGREC_TEST_ROOT}
recorder:
  segment_length_seconds: ${SEGREC_TEST_UNSET_LENGTH:-30}
"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.storage.log_root, "/mnt/logs");
    assert_eq!(config.recorder.segment_length_seconds, 30);
    // Omitted sections fall back to the built-in camera layout
    assert_eq!(config.recorder.streams.len(), 3);
    std::env::remove_var("SEGREC_TEST_ROOT");
}

#[test]
fn test_missing_file_is_an_error() {
    let err = load_config("/nonexistent/segment-recorder.yaml").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to load configuration"));
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let file = write_config("recorder: [unclosed");
    assert!(load_config(file.path()).is_err());
}

#[test]
fn test_validation_rejects_bad_values() {
    let cases: [(&str, fn(&mut RecorderConfig)); 8] = [
        ("segment_length", |c| c.recorder.segment_length_seconds = 0),
        ("compression.level", |c| c.storage.compression.level = 5),
        ("log_root", |c| c.storage.log_root.clear()),
        ("at least one stream", |c| c.recorder.streams.clear()),
        ("fps", |c| c.recorder.streams[0].fps = 0),
        (
            "Duplicate stream",
            |c| {
                let copy = c.recorder.streams[0].clone();
                c.recorder.streams.push(copy);
            },
        ),
        (
            "collides",
            |c| {
                if let Some(secondary) = c.recorder.streams[0].secondary.as_mut() {
                    secondary.filename = "fcamera.hevc".to_string();
                }
            },
        ),
        ("decimation", |c| c.services[0].decimation = Some(0)),
    ];

    for (expected, mutate) in cases {
        let mut config = RecorderConfig::default();
        mutate(&mut config);
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "'{}' not in '{}'",
            expected,
            err
        );
    }
}

#[test]
fn test_parse_overrides_keep_defaults() {
    let config = ConfigLoader::parse(
        r#"
storage:
  compression:
    type: lz4
logging:
  format: json
"#,
    )
    .unwrap();

    assert_eq!(config.storage.compression.r#type, CompressionType::Lz4);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.recorder.segment_length_seconds, 60);
    assert_eq!(config.recorder.camera_patience_ms, 500);
}

#[test]
fn test_stream_config_carries_only_encoder_inputs() {
    let stream = StreamConfig::new("road", "frame", "fcamera.hevc").with_secondary("qcamera.ts", 526, 330);
    let value = serde_json::to_value(&stream).unwrap();

    let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["enabled", "filename", "fps", "frame_service", "name", "secondary"]);
    let mut secondary: Vec<&str> = value["secondary"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    secondary.sort_unstable();
    assert_eq!(secondary, ["filename", "height", "width"]);

    // Older configs that still name a bitrate keep loading
    let config = ConfigLoader::parse(
        r#"
recorder:
  streams:
    - name: road
      frame_service: frame
      filename: fcamera.hevc
      bitrate: 5000000
      secondary:
        filename: qcamera.ts
        width: 526
        height: 330
        bitrate: 128000
"#,
    )
    .unwrap();
    assert_eq!(config.recorder.streams, vec![stream]);
}
