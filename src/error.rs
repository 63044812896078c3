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

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the recording pipeline
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Capture source could not be connected (retried by the worker)
    #[error("capture connect failed for stream '{stream}': {reason}")]
    Capture { stream: String, reason: String },

    #[error("encoder '{name}' failed: {reason}")]
    Encoder { name: String, reason: String },

    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fatal: recording cannot continue without a new segment
    #[error("failed to allocate segment under {root}: {reason}")]
    SegmentAllocation { root: PathBuf, reason: String },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl RecorderError {
    pub fn encoder(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RecorderError::Encoder {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecorderError::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
