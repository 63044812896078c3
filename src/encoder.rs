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

// Video encoders
//
// An encoder writes one output file per segment. Rotation is split in two:
// `rotate` records the next target (called by the rotation token holder
// only) and `reopen` closes the current file and opens that target.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capture::{yuv420_len, Frame};
use crate::config::{StorageConfig, StreamConfig};
use crate::error::{RecorderError, Result};
use crate::protocol::{CompressionLevel, CompressionType, EncodeType};
use crate::storage::LogSink;

/// Where an encoded frame landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeResult {
    /// Segment whose output file received the frame
    pub segment: u32,
    /// Index of the frame within that file
    pub segment_id: u64,
}

pub trait Encoder: Send {
    /// Output file name inside a segment directory
    fn filename(&self) -> &str;

    fn encode_type(&self) -> EncodeType;

    fn open(&mut self, segment_dir: &Path, segment: u32) -> Result<()>;

    fn encode(&mut self, frame: &Frame) -> Result<EncodeResult>;

    /// Record the next segment to write. Takes effect at `reopen`.
    fn rotate(&mut self, segment_dir: &Path, segment: u32) -> Result<()>;

    /// Close the current output and open the one recorded by `rotate`.
    fn reopen(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Builds the encoders for one stream once its frame size is known
pub trait EncoderFactory: Send + Sync {
    fn create(&self, config: &StreamConfig, width: u32, height: u32) -> Result<Vec<Box<dyn Encoder>>>;
}

/// Encoder that stores frames as length-prefixed entries, optionally
/// compressed and downscaled
pub struct FileEncoder {
    filename: String,
    encode_type: EncodeType,
    input: (u32, u32),
    output: (u32, u32),
    compression: CompressionType,
    level: CompressionLevel,
    out: Option<LogSink>,
    segment: Option<u32>,
    segment_id: u64,
    next: Option<(PathBuf, u32)>,
}

impl FileEncoder {
    pub fn new(
        filename: &str,
        input: (u32, u32),
        output: (u32, u32),
        compression: CompressionType,
        level: CompressionLevel,
    ) -> Self {
        let encode_type = if input == output {
            EncodeType::Full
        } else {
            EncodeType::Downscaled
        };
        Self {
            filename: filename.to_string(),
            encode_type,
            input,
            output,
            compression,
            level,
            out: None,
            segment: None,
            segment_id: 0,
            next: None,
        }
    }

    pub fn segment(&self) -> Option<u32> {
        self.segment
    }
}

impl Encoder for FileEncoder {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn encode_type(&self) -> EncodeType {
        self.encode_type
    }

    fn open(&mut self, segment_dir: &Path, segment: u32) -> Result<()> {
        let sink = LogSink::create(&segment_dir.join(&self.filename), self.compression, self.level)?;
        debug!("Encoder {} opened {}", self.filename, sink.path().display());
        self.out = Some(sink);
        self.segment = Some(segment);
        self.segment_id = 0;
        Ok(())
    }

    fn encode(&mut self, frame: &Frame) -> Result<EncodeResult> {
        let (out, segment) = match (self.out.as_mut(), self.segment) {
            (Some(out), Some(segment)) => (out, segment),
            _ => return Err(RecorderError::encoder(&self.filename, "not open")),
        };

        if (frame.width, frame.height) != self.input {
            return Err(RecorderError::encoder(
                &self.filename,
                format!(
                    "frame is {}x{}, encoder expects {}x{}",
                    frame.width, frame.height, self.input.0, self.input.1
                ),
            ));
        }

        if self.output == self.input {
            out.write_entry(&frame.data)?;
        } else {
            let scaled = downscale_yuv420(&frame.data, self.input, self.output)
                .ok_or_else(|| RecorderError::encoder(&self.filename, "short frame buffer"))?;
            out.write_entry(&scaled)?;
        }

        let segment_id = self.segment_id;
        self.segment_id += 1;
        Ok(EncodeResult {
            segment,
            segment_id,
        })
    }

    fn rotate(&mut self, segment_dir: &Path, segment: u32) -> Result<()> {
        self.next = Some((segment_dir.to_path_buf(), segment));
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        match self.next.take() {
            Some((dir, segment)) => {
                self.close()?;
                self.open(&dir, segment)
            }
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.finish()?;
        }
        Ok(())
    }
}

/// Nearest-neighbour resize of a planar YUV420 buffer.
///
/// Returns `None` if `data` is shorter than an `input`-sized frame.
pub fn downscale_yuv420(data: &[u8], input: (u32, u32), output: (u32, u32)) -> Option<Vec<u8>> {
    let (iw, ih) = (input.0 as usize, input.1 as usize);
    let (ow, oh) = (output.0 as usize, output.1 as usize);
    if data.len() < yuv420_len(input.0, input.1) {
        return None;
    }

    let mut out = Vec::with_capacity(yuv420_len(output.0, output.1));
    let luma = iw * ih;
    let chroma = (iw / 2) * (ih / 2);
    let planes = [
        (&data[..luma], iw, ih, ow, oh),
        (&data[luma..luma + chroma], iw / 2, ih / 2, ow / 2, oh / 2),
        (&data[luma + chroma..luma + 2 * chroma], iw / 2, ih / 2, ow / 2, oh / 2),
    ];

    for (plane, pw, ph, qw, qh) in planes {
        for y in 0..qh {
            let sy = (y * ph / qh.max(1)).min(ph.saturating_sub(1));
            for x in 0..qw {
                let sx = (x * pw / qw.max(1)).min(pw.saturating_sub(1));
                out.push(plane.get(sy * pw + sx).copied().unwrap_or(128));
            }
        }
    }
    Some(out)
}

/// Creates a [`FileEncoder`] per output of a stream
#[derive(Debug, Clone)]
pub struct FileEncoderFactory {
    compression: CompressionType,
    level: CompressionLevel,
}

impl FileEncoderFactory {
    pub fn new(compression: CompressionType, level: CompressionLevel) -> Self {
        Self { compression, level }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.compression.r#type,
            CompressionLevel::from_index(config.compression.level),
        )
    }
}

impl EncoderFactory for FileEncoderFactory {
    fn create(&self, config: &StreamConfig, width: u32, height: u32) -> Result<Vec<Box<dyn Encoder>>> {
        if width == 0 || height == 0 {
            return Err(RecorderError::encoder(&config.filename, "zero frame size"));
        }

        let mut encoders: Vec<Box<dyn Encoder>> = vec![Box::new(FileEncoder::new(
            &config.filename,
            (width, height),
            (width, height),
            self.compression,
            self.level,
        ))];

        if let Some(secondary) = &config.secondary {
            encoders.push(Box::new(FileEncoder::new(
                &secondary.filename,
                (width, height),
                (secondary.width, secondary.height),
                self.compression,
                self.level,
            )));
        }

        debug!(
            "Created {} encoder(s) for stream '{}' at {}x{}",
            encoders.len(),
            config.name,
            width,
            height
        );
        Ok(encoders)
    }
}
