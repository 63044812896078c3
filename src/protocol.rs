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

// Records written to the segment logs

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Compression level (0-4)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum CompressionLevel {
    Fastest = 0,
    Fast = 1,
    #[default]
    Default = 2,
    Slow = 3,
    Slowest = 4,
}

impl CompressionLevel {
    pub fn from_index(level: u8) -> Self {
        match level {
            0 => CompressionLevel::Fastest,
            1 => CompressionLevel::Fast,
            3 => CompressionLevel::Slow,
            4 => CompressionLevel::Slowest,
            _ => CompressionLevel::Default,
        }
    }

    pub fn to_zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 10,
            CompressionLevel::Slowest => 19,
        }
    }

    pub fn to_lz4_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 9,
            CompressionLevel::Slowest => 12,
        }
    }
}

/// Compression type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl CompressionType {
    /// File extension appended to compressed logs
    pub fn extension(self) -> Option<&'static str> {
        match self {
            CompressionType::None => None,
            CompressionType::Lz4 => Some("lz4"),
            CompressionType::Zstd => Some("zst"),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("lz4") => CompressionType::Lz4,
            Some("zst") => CompressionType::Zstd,
            _ => CompressionType::None,
        }
    }
}

/// Kind of encoded output an index record points into
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum EncodeType {
    Full,
    Downscaled,
}

/// Correlates one encoded frame with the frame id observed in the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncodeIndex {
    pub stream: String,
    pub frame_id: u64,
    pub timestamp_sof: u64,
    pub timestamp_eof: u64,
    pub r#type: EncodeType,
    /// Running count of frames handled by this encoder thread
    pub encode_id: u64,
    /// Segment the frame was encoded into
    pub segment_num: u32,
    /// Position of the frame inside that segment's output file
    pub segment_id: u64,
}

/// Header written at the start of every segment log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    pub version: String,
    pub route: String,
    pub device_type: String,
    pub kernel_args: Vec<String>,
    pub kernel_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dongle_id: Option<String>,
    pub dirty: bool,
}

impl InitData {
    /// Gather host information. Missing sources leave fields empty.
    pub fn collect(route: &str) -> Self {
        let kernel_args = std::fs::read_to_string("/proc/cmdline")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let kernel_version = std::fs::read_to_string("/proc/version").unwrap_or_default();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            route: route.to_string(),
            device_type: std::env::consts::ARCH.to_string(),
            kernel_args,
            kernel_version,
            dongle_id: std::env::var("DONGLE_ID").ok(),
            dirty: std::env::var("CLEAN").is_err(),
        }
    }
}

/// Frame metadata published by a capture source on the message bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FramePacket {
    pub stream: String,
    pub frame_id: u64,
    pub timestamp_sof: u64,
    pub timestamp_eof: u64,
}

/// Boot record written by bootlog mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Boot {
    pub wall_time_nanos: i64,
    pub last_kmsg: String,
    pub last_pmsg: String,
    pub launch_log: String,
}

/// Everything the recorder itself writes into a log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LogRecord {
    InitData(InitData),
    Boot(Boot),
    Frame(FramePacket),
    EncodeIndex(EncodeIndex),
}

impl LogRecord {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
