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

// Segment log writer trait

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::sink::LogSink;
use crate::error::Result;

/// One numbered recording segment
#[derive(Debug, Clone)]
pub struct Segment {
    pub number: u32,
    /// Directory holding the segment's logs and video outputs
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
}

impl Segment {
    pub fn new(number: u32, path: PathBuf) -> Self {
        Self {
            number,
            path,
            created_at: Local::now(),
        }
    }
}

// Identity is the number and location; creation time is informational
impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.path == other.path
    }
}

/// Writer for the per-segment structured logs
///
/// The main thread calls `next_segment` and `log`; encoder threads take
/// handles with `open_handle` and append index records through them.
pub trait LogWriter: Send + Sync {
    /// Close the current segment and start the next one.
    ///
    /// A failure here means recording cannot continue.
    fn next_segment(&self) -> Result<Segment>;

    /// Handle onto the current segment's logs.
    fn open_handle(&self) -> Result<LogHandle>;

    /// Append one message to the current segment's rlog (and qlog if
    /// `in_qlog`).
    fn log(&self, data: &[u8], in_qlog: bool) -> Result<()>;

    /// Close the current segment.
    fn close(&self) -> Result<()>;
}

/// Open log files of one segment
///
/// Shared between the writer and every handle; the files are finalized and
/// the lock file removed when the last reference goes away.
pub struct SegmentLog {
    pub(crate) number: u32,
    pub(crate) files: Mutex<SegmentFiles>,
    pub(crate) lock_path: Option<PathBuf>,
}

pub(crate) struct SegmentFiles {
    pub rlog: LogSink,
    pub qlog: Option<LogSink>,
}

impl SegmentLog {
    pub fn append(&self, data: &[u8], in_qlog: bool) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.rlog.write_entry(data)?;
        if in_qlog {
            if let Some(qlog) = files.qlog.as_mut() {
                qlog.write_entry(data)?;
            }
        }
        Ok(())
    }
}

impl Drop for SegmentLog {
    fn drop(&mut self) {
        let files = self.files.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = files.rlog.finish() {
            tracing::error!("Failed to close rlog of segment {}: {}", self.number, e);
        }
        if let Some(qlog) = files.qlog.as_mut() {
            if let Err(e) = qlog.finish() {
                tracing::error!("Failed to close qlog of segment {}: {}", self.number, e);
            }
        }
        if let Some(lock_path) = &self.lock_path {
            let _ = std::fs::remove_file(lock_path);
        }
    }
}

/// Reference-counted handle onto one segment's logs
#[derive(Clone)]
pub struct LogHandle {
    log: Arc<SegmentLog>,
}

impl LogHandle {
    pub(crate) fn new(log: Arc<SegmentLog>) -> Self {
        Self { log }
    }

    pub fn segment(&self) -> u32 {
        self.log.number
    }

    pub fn append(&self, data: &[u8], in_qlog: bool) -> Result<()> {
        self.log.append(data, in_qlog)
    }

    /// Release this handle. The segment's files close once the writer and
    /// every other handle have let go.
    pub fn close(self) {}
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("segment", &self.log.number)
            .finish()
    }
}
