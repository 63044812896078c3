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

// One-shot boot log: a single segment holding the init header and a boot
// record with whatever the previous boot left behind.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::protocol::{Boot, LogRecord};
use crate::storage::{FilesystemLogger, LogWriter, LoggerOptions, Segment};

/// Files read into the boot record
#[derive(Debug, Clone)]
pub struct BootSources {
    pub kmsg: PathBuf,
    pub pmsg: PathBuf,
    pub launch_log: PathBuf,
}

impl BootSources {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            kmsg: PathBuf::from("/sys/fs/pstore/console-ramoops"),
            pmsg: PathBuf::from("/sys/fs/pstore/pmsg-ramoops-0"),
            launch_log: PathBuf::from(&config.launch_log),
        }
    }
}

fn read_lossy(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("Boot source {} unavailable: {}", path.display(), e);
            String::new()
        }
    }
}

pub fn boot_record(sources: &BootSources) -> Boot {
    Boot {
        wall_time_nanos: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        last_kmsg: read_lossy(&sources.kmsg),
        last_pmsg: read_lossy(&sources.pmsg),
        launch_log: read_lossy(&sources.launch_log),
    }
}

/// Write the boot log under the configured log root.
pub fn write_bootlog(config: &StorageConfig) -> Result<Segment> {
    let mut options = LoggerOptions::from_config(config);
    options.log_name = "bootlog".to_string();
    options.write_qlog = false;
    write_bootlog_with(FilesystemLogger::new(options)?, &BootSources::from_config(config))
}

pub fn write_bootlog_with(logger: FilesystemLogger, sources: &BootSources) -> Result<Segment> {
    let segment = logger.next_segment()?;
    warn!("Bootlog to {}", segment.path.display());

    let record = LogRecord::Boot(boot_record(sources)).to_bytes()?;
    logger.log(&record, false)?;
    logger.close()?;
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CompressionLevel, CompressionType};
    use crate::storage::read_entries;
    use tempfile::TempDir;

    #[test]
    fn test_bootlog_contains_init_and_boot() {
        let temp_dir = TempDir::new().unwrap();
        let launch_log = temp_dir.path().join("launch_log");
        std::fs::write(&launch_log, "launched manager").unwrap();

        let options = LoggerOptions {
            root: temp_dir.path().join("logs"),
            log_name: "bootlog".to_string(),
            write_qlog: false,
            compression: CompressionType::Zstd,
            level: CompressionLevel::Fast,
        };
        let logger = FilesystemLogger::with_route(options, "boot".to_string(), b"init".to_vec()).unwrap();
        let sources = BootSources {
            kmsg: temp_dir.path().join("missing-kmsg"),
            pmsg: temp_dir.path().join("missing-pmsg"),
            launch_log,
        };

        let segment = write_bootlog_with(logger, &sources).unwrap();
        assert_eq!(segment.number, 0);
        assert!(!segment.path.join("bootlog.lock").exists());
        assert!(!segment.path.join("qlog.zst").exists());

        let entries = read_entries(&segment.path.join("bootlog.zst")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], b"init".to_vec());
        match LogRecord::from_bytes(&entries[1]).unwrap() {
            LogRecord::Boot(boot) => {
                assert_eq!(boot.launch_log, "launched manager");
                assert!(boot.last_kmsg.is_empty());
                assert!(boot.wall_time_nanos > 0);
            }
            other => panic!("expected boot record, got {:?}", other),
        }
    }
}
