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

// Per-stream encoder thread
//
// capture -> (rotation if pending) -> encode -> index record, with the
// capture connection retried forever until shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::capture::{CaptureSource, CaptureStream, Frame, FrameRead};
use crate::clock::{CatchUp, FrameClock};
use crate::config::StreamConfig;
use crate::coordinator::{Cutover, Participation, RotationCoordinator};
use crate::encoder::{Encoder, EncoderFactory};
use crate::error::{RecorderError, Result};
use crate::protocol::{EncodeIndex, LogRecord};
use crate::storage::{LogHandle, LogWriter, Segment};

/// Everything an encoder thread needs from the recorder
#[derive(Clone)]
pub struct WorkerContext {
    pub coordinator: RotationCoordinator,
    pub logger: Arc<dyn LogWriter>,
    pub capture: Arc<dyn CaptureSource>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub cancel: CancellationToken,
    pub capture_retry: Duration,
    pub frame_timeout: Duration,
    pub skew_bound: u64,
}

/// Output side of a stream: encoders plus the index-log handle
struct Outputs {
    stream: String,
    encoders: Vec<Box<dyn Encoder>>,
    log: Option<LogHandle>,
    logger: Arc<dyn LogWriter>,
}

impl Cutover for Outputs {
    fn rotate_encoders(&mut self, segment: &Segment) -> Result<()> {
        let mut result = Ok(());
        for encoder in self.encoders.iter_mut() {
            if let Err(e) = encoder.rotate(&segment.path, segment.number) {
                error!("Encoder {} rotate failed: {}", encoder.filename(), e);
                result = Err(e);
            }
        }
        result
    }

    fn refresh_log_handle(&mut self, segment: &Segment) -> Result<()> {
        if let Some(old) = self.log.take() {
            old.close();
        }
        let handle = self.logger.open_handle()?;
        if handle.segment() != segment.number {
            debug!(
                "Stream '{}' index handle is on segment {} (rotating to {})",
                self.stream,
                handle.segment(),
                segment.number
            );
        }
        self.log = Some(handle);
        Ok(())
    }

    fn reopen_outputs(&mut self, _segment: &Segment) -> Result<()> {
        let mut result = Ok(());
        for encoder in self.encoders.iter_mut() {
            if let Err(e) = encoder.reopen() {
                error!("Encoder {} reopen failed: {}", encoder.filename(), e);
                result = Err(e);
            }
        }
        result
    }
}

enum LoopExit {
    Disconnected,
    Cancelled,
}

/// Encoder thread for one stream
pub struct EncoderWorker {
    config: StreamConfig,
    stream: usize,
    ctx: WorkerContext,
    clock: FrameClock,
    outputs: Outputs,
    encode_count: u64,
}

impl EncoderWorker {
    pub fn new(config: StreamConfig, stream: usize, ctx: WorkerContext) -> Self {
        let clock = FrameClock::new(ctx.coordinator.shared().clone(), stream, ctx.skew_bound);
        let outputs = Outputs {
            stream: config.name.clone(),
            encoders: Vec::new(),
            log: None,
            logger: ctx.logger.clone(),
        };
        Self {
            config,
            stream,
            ctx,
            clock,
            outputs,
            encode_count: 0,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("encoder-{}", self.config.name))
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!("Encoder thread for '{}' started", self.config.name);
        let cancel = self.ctx.cancel.clone();

        while !cancel.is_cancelled() {
            let mut capture = match self.ctx.capture.connect(&self.config) {
                Ok(capture) => capture,
                Err(e) => {
                    debug!("{}", e);
                    if cancel.sleep(self.ctx.capture_retry) {
                        break;
                    }
                    continue;
                }
            };

            // Encoders outlive reconnects
            if self.outputs.encoders.is_empty() {
                let (width, height) = capture.dimensions();
                debug!("Encoder init {}x{} for '{}'", width, height, self.config.name);
                match self.ctx.encoders.create(&self.config, width, height) {
                    Ok(encoders) => self.outputs.encoders = encoders,
                    Err(e) => {
                        error!("Stream '{}' encoder init failed: {}", self.config.name, e);
                        if cancel.sleep(self.ctx.capture_retry) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !self.ctx.coordinator.join(self.stream, &cancel) {
                break;
            }

            match self.capture_loop(capture.as_mut(), &cancel) {
                LoopExit::Cancelled => break,
                LoopExit::Disconnected => {
                    if let Some(log) = self.outputs.log.take() {
                        log.close();
                    }
                    self.ctx.coordinator.leave(self.stream);
                }
            }
        }

        self.teardown();
    }

    fn capture_loop(
        &mut self,
        capture: &mut dyn CaptureStream,
        cancel: &CancellationToken,
    ) -> LoopExit {
        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            let frame = match capture.get_frame(self.ctx.frame_timeout) {
                FrameRead::Frame(frame) => frame,
                FrameRead::Timeout => {
                    // A connected but silent camera still completes its part
                    // of a pending rotation so the others are not stalled
                    let outcome =
                        self.ctx
                            .coordinator
                            .participate(self.stream, None, cancel, &mut self.outputs);
                    if outcome == Participation::Cancelled {
                        return LoopExit::Cancelled;
                    }
                    continue;
                }
                FrameRead::Disconnected => {
                    warn!("Capture for '{}' disconnected", self.config.name);
                    return LoopExit::Disconnected;
                }
            };

            if self.clock.wait_for_log_catch_up(cancel) == CatchUp::Cancelled {
                return LoopExit::Cancelled;
            }

            let outcome = self.ctx.coordinator.participate(
                self.stream,
                Some(frame.frame_id),
                cancel,
                &mut self.outputs,
            );
            if outcome == Participation::Cancelled {
                return LoopExit::Cancelled;
            }

            self.clock.set_producer_frame(frame.frame_id);
            self.encode(&frame);
        }
    }

    fn encode(&mut self, frame: &Frame) {
        for encoder in self.outputs.encoders.iter_mut() {
            let result = match encoder.encode(frame) {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        "Stream '{}' dropped frame {}: {}",
                        self.config.name, frame.frame_id, e
                    );
                    continue;
                }
            };

            let record = LogRecord::EncodeIndex(EncodeIndex {
                stream: self.config.name.clone(),
                frame_id: frame.frame_id,
                timestamp_sof: frame.timestamp_sof,
                timestamp_eof: frame.timestamp_eof,
                r#type: encoder.encode_type(),
                encode_id: self.encode_count,
                segment_num: result.segment,
                segment_id: result.segment_id,
            });

            if let Some(log) = &self.outputs.log {
                let written = record
                    .to_bytes()
                    .map_err(RecorderError::from)
                    .and_then(|bytes| log.append(&bytes, false));
                if let Err(e) = written {
                    error!(
                        "Stream '{}' failed to index frame {}: {}",
                        self.config.name, frame.frame_id, e
                    );
                }
            }
        }
        self.encode_count += 1;
    }

    fn teardown(&mut self) {
        self.clock.cancel_wait();
        for encoder in self.outputs.encoders.iter_mut() {
            if let Err(e) = encoder.close() {
                error!("Encoder {} close failed: {}", encoder.filename(), e);
            }
        }
        if let Some(log) = self.outputs.log.take() {
            log.close();
        }
        info!(
            "Encoder thread for '{}' exited after {} frames",
            self.config.name, self.encode_count
        );
    }
}
