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

// Filesystem log writer
//
// Layout: <root>/<route>--<segment>/{rlog,qlog}[.zst|.lz4] plus a
// <name>.lock marker while the segment is still being written.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::backend::{LogHandle, LogWriter, Segment, SegmentFiles, SegmentLog};
use super::sink::LogSink;
use crate::config::StorageConfig;
use crate::error::{RecorderError, Result};
use crate::protocol::{CompressionLevel, CompressionType, InitData, LogRecord};

/// Options for a [`FilesystemLogger`]
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub root: PathBuf,
    /// Base name of the full log ("rlog", or "bootlog")
    pub log_name: String,
    /// Also write the decimated qlog
    pub write_qlog: bool,
    pub compression: CompressionType,
    pub level: CompressionLevel,
}

impl LoggerOptions {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root: PathBuf::from(&config.log_root),
            log_name: "rlog".to_string(),
            write_qlog: true,
            compression: config.compression.r#type,
            level: CompressionLevel::from_index(config.compression.level),
        }
    }
}

struct LoggerInner {
    part: Option<u32>,
    current: Option<Arc<SegmentLog>>,
}

/// Writes numbered segment directories under a fixed root
pub struct FilesystemLogger {
    options: LoggerOptions,
    route: String,
    init: Vec<u8>,
    inner: Mutex<LoggerInner>,
}

impl FilesystemLogger {
    pub fn new(options: LoggerOptions) -> Result<Self> {
        let route = route_name();
        let init = LogRecord::InitData(InitData::collect(&route)).to_bytes()?;
        Self::with_route(options, route, init)
    }

    pub fn with_route(options: LoggerOptions, route: String, init: Vec<u8>) -> Result<Self> {
        info!(
            "Initializing segment logger at: {} (route {})",
            options.root.display(),
            route
        );
        fs::create_dir_all(&options.root)
            .map_err(|e| RecorderError::storage(&options.root, e))?;

        Ok(Self {
            options,
            route,
            init,
            inner: Mutex::new(LoggerInner {
                part: None,
                current: None,
            }),
        })
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Number of the segment currently open, if any
    pub fn part(&self) -> Option<u32> {
        self.lock().part
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoggerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn segment_dir(&self, number: u32) -> PathBuf {
        self.options.root.join(format!("{}--{}", self.route, number))
    }

    fn open_segment(&self, number: u32, dir: &Path) -> std::result::Result<SegmentLog, String> {
        fs::create_dir_all(dir).map_err(|e| format!("create {}: {}", dir.display(), e))?;

        let lock_path = dir.join(format!("{}.lock", self.options.log_name));
        fs::File::create(&lock_path)
            .map_err(|e| format!("create {}: {}", lock_path.display(), e))?;

        let mut rlog = LogSink::create(
            &dir.join(&self.options.log_name),
            self.options.compression,
            self.options.level,
        )
        .map_err(|e| e.to_string())?;
        rlog.write_entry(&self.init).map_err(|e| e.to_string())?;

        let qlog = if self.options.write_qlog {
            let mut qlog = LogSink::create(
                &dir.join("qlog"),
                self.options.compression,
                self.options.level,
            )
            .map_err(|e| e.to_string())?;
            qlog.write_entry(&self.init).map_err(|e| e.to_string())?;
            Some(qlog)
        } else {
            None
        };

        Ok(SegmentLog {
            number,
            files: Mutex::new(SegmentFiles { rlog, qlog }),
            lock_path: Some(lock_path),
        })
    }
}

impl LogWriter for FilesystemLogger {
    fn next_segment(&self) -> Result<Segment> {
        let mut inner = self.lock();
        let number = inner.part.map_or(0, |p| p + 1);
        let dir = self.segment_dir(number);

        let log = self
            .open_segment(number, &dir)
            .map_err(|reason| RecorderError::SegmentAllocation {
                root: self.options.root.clone(),
                reason,
            })?;

        // The previous segment closes once its last handle is released
        inner.current = Some(Arc::new(log));
        inner.part = Some(number);
        debug!("Opened segment {} at {}", number, dir.display());

        Ok(Segment::new(number, dir))
    }

    fn open_handle(&self) -> Result<LogHandle> {
        match self.lock().current.as_ref() {
            Some(log) => Ok(LogHandle::new(log.clone())),
            None => Err(RecorderError::storage(
                &self.options.root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no segment open"),
            )),
        }
    }

    fn log(&self, data: &[u8], in_qlog: bool) -> Result<()> {
        let current = self.lock().current.clone();
        match current {
            Some(log) => log.append(data, in_qlog),
            None => {
                debug!("Dropping {} byte message, no segment open", data.len());
                Ok(())
            }
        }
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if let Some(log) = inner.current.take() {
            info!("Closing segment {}", log.number);
        }
        Ok(())
    }
}

/// Route name for this process run, from local wall-clock time
pub fn route_name() -> String {
    chrono::Local::now().format("%Y-%m-%d--%H-%M-%S").to_string()
}

/// Remove stale `*.lock` markers left under `root` by a previous run.
///
/// Returns how many were removed.
pub fn clear_locks(root: &Path) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            removed += clear_locks(&path);
        } else if path.extension().is_some_and(|ext| ext == "lock") {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale lock {}: {}", path.display(), e),
            }
        }
    }
    removed
}
