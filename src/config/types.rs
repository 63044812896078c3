// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for segment-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::CompressionType;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    /// Services whose messages are written to the segment logs
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            recorder: RecorderSettings::default(),
            services: default_services(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where and how segment logs are written
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_log_root")]
    pub log_root: String,

    #[serde(default)]
    pub compression: CompressionConfig,

    /// File read into the boot record by `--bootlog`
    #[serde(default = "default_launch_log")]
    pub launch_log: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_root: default_log_root(),
            compression: CompressionConfig::default(),
            launch_log: default_launch_log(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub r#type: CompressionType, // "none", "lz4", "zstd"
    #[serde(default = "default_compression_level")]
    pub level: u8, // 0-4
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            r#type: CompressionType::default(),
            level: default_compression_level(),
        }
    }
}

/// Segment rotation and encoder-thread settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    #[serde(default = "default_segment_length")]
    pub segment_length_seconds: u64,

    /// Main loop poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Camera silence after which rotation falls back to wall-clock time
    #[serde(default = "default_camera_patience")]
    pub camera_patience_ms: u64,

    /// Maximum encoder lead over the main log before a discontinuity is assumed
    #[serde(default = "default_skew_bound")]
    pub skew_bound: u64,

    #[serde(default = "default_capture_retry")]
    pub capture_retry_ms: u64,

    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_ms: u64,

    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            segment_length_seconds: default_segment_length(),
            poll_interval_ms: default_poll_interval(),
            camera_patience_ms: default_camera_patience(),
            skew_bound: default_skew_bound(),
            capture_retry_ms: default_capture_retry(),
            frame_timeout_ms: default_frame_timeout(),
            streams: default_streams(),
        }
    }
}

impl RecorderSettings {
    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(self.segment_length_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn camera_patience(&self) -> Duration {
        Duration::from_millis(self.camera_patience_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// One recorded camera stream
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StreamConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Service carrying this stream's frame packets on the message bus
    pub frame_service: String,

    /// Output file name of the primary encoder
    pub filename: String,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Downscaled secondary output
    #[serde(default)]
    pub secondary: Option<SecondaryOutput>,
}

impl StreamConfig {
    pub fn new(name: &str, frame_service: &str, filename: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            frame_service: frame_service.to_string(),
            filename: filename.to_string(),
            fps: default_fps(),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, filename: &str, width: u32, height: u32) -> Self {
        self.secondary = Some(SecondaryOutput {
            filename: filename.to_string(),
            width,
            height,
        });
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SecondaryOutput {
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// A message-bus service logged into the segment logs
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// Every N-th message also goes to the qlog; none means rlog only
    #[serde(default)]
    pub decimation: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_streams() -> Vec<StreamConfig> {
    let mut wide = StreamConfig::new("wide", "wideFrame", "ecamera.hevc");
    wide.enabled = false;
    vec![
        StreamConfig::new("road", "frame", "fcamera.hevc").with_secondary("qcamera.ts", 526, 330),
        StreamConfig::new("driver", "frontFrame", "dcamera.hevc"),
        wide,
    ]
}

fn default_services() -> Vec<ServiceConfig> {
    ["frame", "frontFrame", "wideFrame"]
        .iter()
        .map(|name| ServiceConfig {
            name: name.to_string(),
            decimation: Some(20),
        })
        .collect()
}

// Default value functions
fn default_true() -> bool { true }
fn default_log_root() -> String { "/data/media/0/realdata".to_string() }
fn default_launch_log() -> String { "/tmp/launch_log".to_string() }
fn default_compression_level() -> u8 { 2 }
fn default_segment_length() -> u64 { 60 }
fn default_poll_interval() -> u64 { 100 }
fn default_camera_patience() -> u64 { 500 }
fn default_skew_bound() -> u64 { 8 }
fn default_capture_retry() -> u64 { 100 }
fn default_frame_timeout() -> u64 { 1000 }
fn default_fps() -> u32 { 20 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
