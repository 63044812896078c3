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

// Recorder: owns the shared rotation state, the encoder threads and the
// main poll loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::capture::CaptureSource;
use crate::clock::FrameClock;
use crate::config::{RecorderConfig, StreamConfig};
use crate::coordinator::RotationCoordinator;
use crate::demux::{Decimator, EventSource};
use crate::encoder::{EncoderFactory, FileEncoderFactory};
use crate::error::{RecorderError, Result};
use crate::scheduler::SegmentScheduler;
use crate::state::{Shared, StreamState};
use crate::storage::{FilesystemLogger, LogWriter, LoggerOptions, Segment};
use crate::worker::{EncoderWorker, WorkerContext};

const STATS_EVERY: u64 = 1000;

/// Message throughput of the main loop
#[derive(Debug, Clone)]
pub struct RecorderStats {
    pub messages: u64,
    pub bytes: u64,
    pub started: Instant,
    next_report: u64,
}

impl RecorderStats {
    fn new() -> Self {
        Self {
            messages: 0,
            bytes: 0,
            started: Instant::now(),
            next_report: STATS_EVERY,
        }
    }

    fn record(&mut self, bytes: usize) {
        self.messages += 1;
        self.bytes += bytes as u64;
        if self.messages >= self.next_report {
            self.next_report += STATS_EVERY;
            let secs = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
            debug!(
                "{} messages, {:.2} msg/sec, {:.2} KB/sec",
                self.messages,
                self.messages as f64 / secs,
                self.bytes as f64 * 0.001 / secs
            );
        }
    }
}

pub struct Recorder {
    streams: Vec<StreamConfig>,
    poll_interval: Duration,
    coordinator: RotationCoordinator,
    logger: Arc<dyn LogWriter>,
    scheduler: SegmentScheduler,
    events: Box<dyn EventSource>,
    decimator: Decimator,
    clocks: Vec<FrameClock>,
    frame_services: HashMap<String, usize>,
    context: WorkerContext,
    workers: Vec<JoinHandle<()>>,
    stats: RecorderStats,
    started: bool,
}

impl Recorder {
    pub fn new(
        config: &RecorderConfig,
        logger: Arc<dyn LogWriter>,
        capture: Arc<dyn CaptureSource>,
        encoders: Arc<dyn EncoderFactory>,
        events: Box<dyn EventSource>,
    ) -> Self {
        let settings = &config.recorder;
        let states = settings.streams.iter().map(StreamState::from_config).collect();
        let shared = Arc::new(Shared::new(states));
        let coordinator = RotationCoordinator::new(shared.clone());

        let clocks = (0..settings.streams.len())
            .map(|i| FrameClock::new(shared.clone(), i, settings.skew_bound))
            .collect();
        let frame_services = settings
            .streams
            .iter()
            .enumerate()
            .map(|(i, s)| (s.frame_service.clone(), i))
            .collect();

        let context = WorkerContext {
            coordinator: coordinator.clone(),
            logger: logger.clone(),
            capture,
            encoders,
            cancel: CancellationToken::new(),
            capture_retry: settings.capture_retry(),
            frame_timeout: settings.frame_timeout(),
            skew_bound: settings.skew_bound,
        };

        Self {
            streams: settings.streams.clone(),
            poll_interval: settings.poll_interval(),
            scheduler: SegmentScheduler::new(logger.clone(), coordinator.clone(), settings),
            coordinator,
            logger,
            events,
            decimator: Decimator::from_services(&config.services),
            clocks,
            frame_services,
            context,
            workers: Vec::new(),
            stats: RecorderStats::new(),
            started: false,
        }
    }

    /// Recorder writing segments under `config.storage.log_root` with file
    /// encoders.
    pub fn from_config(
        config: &RecorderConfig,
        capture: Arc<dyn CaptureSource>,
        events: Box<dyn EventSource>,
    ) -> Result<Self> {
        let logger = FilesystemLogger::new(LoggerOptions::from_config(&config.storage))?;
        let encoders = FileEncoderFactory::from_config(&config.storage);
        Ok(Self::new(config, Arc::new(logger), capture, Arc::new(encoders), events))
    }

    /// Token that stops the recorder when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    pub fn coordinator(&self) -> &RotationCoordinator {
        &self.coordinator
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.scheduler.current()
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    /// Open segment 0 and spawn one encoder thread per enabled stream.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        // Segment 0 exists before any encoder can need it
        self.scheduler.poll(Instant::now())?;

        for (i, stream) in self.streams.iter().enumerate() {
            if !stream.enabled {
                debug!("Stream '{}' disabled", stream.name);
                continue;
            }
            let worker = EncoderWorker::new(stream.clone(), i, self.context.clone());
            let handle = worker
                .spawn()
                .map_err(|e| RecorderError::encoder(&stream.name, e))?;
            self.workers.push(handle);
        }

        info!("Recording {} stream(s)", self.workers.len());
        Ok(())
    }

    /// One main-loop iteration: log pending bus messages, advance the
    /// consumer counters and evaluate the segment trigger.
    pub fn poll_once(&mut self) -> Result<Option<Segment>> {
        let events = self.events.poll(self.poll_interval);

        let mut latest: HashMap<usize, u64> = HashMap::new();
        for event in &events {
            let in_qlog = self.decimator.in_qlog(&event.service);
            if let Err(e) = self.logger.log(&event.payload, in_qlog) {
                error!("Failed to log {} message: {}", event.service, e);
            }
            self.stats.record(event.payload.len());

            if let (Some(frame_id), Some(&stream)) =
                (event.frame_id, self.frame_services.get(&event.service))
            {
                latest.insert(stream, frame_id);
            }
        }

        // Only the newest frame per stream matters
        for (stream, frame_id) in latest {
            self.clocks[stream].set_consumer_frame(frame_id);
        }

        self.scheduler.poll(Instant::now())
    }

    /// Record until the cancel token fires or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        let cancel = self.cancel_token();
        let result = self.start().and_then(|_| {
            while !cancel.is_cancelled() {
                self.poll_once()?;
            }
            Ok(())
        });

        if let Err(e) = &result {
            error!("Recording stopped: {}", e);
        }
        self.shutdown()?;
        result
    }

    /// Stop every encoder thread and close the current segment.
    pub fn shutdown(&mut self) -> Result<()> {
        let cancel = self.cancel_token();
        if !self.started && self.workers.is_empty() {
            return Ok(());
        }

        warn!("Closing encoders");
        cancel.cancel();
        self.coordinator.shutdown();
        for clock in &self.clocks {
            clock.cancel_wait();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Encoder thread panicked");
            }
        }

        warn!("Closing logger");
        self.started = false;
        self.logger.close()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            if let Err(e) = self.shutdown() {
                error!("Shutdown failed: {}", e);
            }
        }
    }
}
