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

//! Length-prefixed, optionally compressed log files
//!
//! # Format
//!
//! A log is a sequence of entries, each a little-endian `u32` length
//! followed by that many bytes. The whole stream is wrapped in the
//! configured compression (LZ4 frame or Zstd), chosen by file extension.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, Result};
use crate::protocol::{CompressionLevel, CompressionType};

enum Writer {
    Plain(BufWriter<File>),
    Lz4(lz4::Encoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

/// Streaming writer for one log file
pub struct LogSink {
    path: PathBuf,
    writer: Option<Writer>,
    entries: u64,
}

impl LogSink {
    /// Create `path` (with the compression extension appended).
    pub fn create(
        path: &Path,
        compression: CompressionType,
        level: CompressionLevel,
    ) -> Result<Self> {
        let path = match compression.extension() {
            Some(ext) => PathBuf::from(format!("{}.{}", path.display(), ext)),
            None => path.to_path_buf(),
        };
        let file = File::create(&path).map_err(|e| RecorderError::storage(&path, e))?;
        let buffered = BufWriter::new(file);

        let writer = match compression {
            CompressionType::None => Writer::Plain(buffered),
            CompressionType::Lz4 => Writer::Lz4(
                lz4::EncoderBuilder::new()
                    .level(level.to_lz4_level())
                    .build(buffered)
                    .map_err(|e| RecorderError::storage(&path, e))?,
            ),
            CompressionType::Zstd => Writer::Zstd(
                zstd::stream::write::Encoder::new(buffered, level.to_zstd_level())
                    .map_err(|e| RecorderError::storage(&path, e))?,
            ),
        };

        Ok(Self {
            path,
            writer: Some(writer),
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn write_entry(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| {
            RecorderError::storage(
                &self.path,
                std::io::Error::new(ErrorKind::InvalidInput, "log entry exceeds 4 GiB"),
            )
        })?;

        let writer: &mut dyn Write = match self.writer.as_mut() {
            Some(Writer::Plain(w)) => w,
            Some(Writer::Lz4(w)) => w,
            Some(Writer::Zstd(w)) => w,
            None => {
                return Err(RecorderError::storage(
                    &self.path,
                    std::io::Error::new(ErrorKind::BrokenPipe, "log already finished"),
                ))
            }
        };

        writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| writer.write_all(data))
            .map_err(|e| RecorderError::storage(&self.path, e))?;
        self.entries += 1;
        Ok(())
    }

    /// Flush and finalize the compression frame. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        let inner = match self.writer.take() {
            Some(Writer::Plain(w)) => w,
            Some(Writer::Lz4(w)) => {
                let (inner, result) = w.finish();
                result.map_err(|e| RecorderError::storage(&self.path, e))?;
                inner
            }
            Some(Writer::Zstd(w)) => w
                .finish()
                .map_err(|e| RecorderError::storage(&self.path, e))?,
            None => return Ok(()),
        };

        inner
            .into_inner()
            .map_err(|e| RecorderError::storage(&self.path, e.into_error()))?
            .sync_all()
            .map_err(|e| RecorderError::storage(&self.path, e))
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("Failed to finalize log {}: {}", self.path.display(), e);
        }
    }
}

/// Read every entry of a log written by [`LogSink`].
pub fn read_entries(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file = File::open(path).map_err(|e| RecorderError::storage(path, e))?;
    let buffered = BufReader::new(file);
    let mut reader: Box<dyn Read> = match CompressionType::from_path(path) {
        CompressionType::None => Box::new(buffered),
        CompressionType::Lz4 => {
            Box::new(lz4::Decoder::new(buffered).map_err(|e| RecorderError::storage(path, e))?)
        }
        CompressionType::Zstd => Box::new(
            zstd::stream::read::Decoder::new(buffered)
                .map_err(|e| RecorderError::storage(path, e))?,
        ),
    };

    let mut entries = Vec::new();
    loop {
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(RecorderError::storage(path, e)),
        }
        let mut data = vec![0u8; u32::from_le_bytes(len) as usize];
        reader
            .read_exact(&mut data)
            .map_err(|e| RecorderError::storage(path, e))?;
        entries.push(data);
    }
    Ok(entries)
}
