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

// Camera capture sources
//
// Frames are planar YUV420. A capture stream hands out frames in order
// until it times out or the camera goes away; the worker reconnects
// through its `CaptureSource`.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::demux::{Event, EventSender};
use crate::error::{RecorderError, Result};
use crate::protocol::FramePacket;

/// One captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: u64,
    pub timestamp_sof: u64,
    pub timestamp_eof: u64,
    pub width: u32,
    pub height: u32,
    /// Y plane followed by the U and V planes
    pub data: Bytes,
}

impl Frame {
    pub fn packet(&self, stream: &str) -> FramePacket {
        FramePacket {
            stream: stream.to_string(),
            frame_id: self.frame_id,
            timestamp_sof: self.timestamp_sof,
            timestamp_eof: self.timestamp_eof,
        }
    }
}

/// Size in bytes of a YUV420 frame
pub fn yuv420_len(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    luma + 2 * ((width as usize / 2) * (height as usize / 2))
}

/// Result of [`CaptureStream::get_frame`]
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    Frame(Frame),
    Timeout,
    Disconnected,
}

/// A connected camera
pub trait CaptureStream: Send {
    fn get_frame(&mut self, timeout: Duration) -> FrameRead;

    /// (width, height) of the frames this stream delivers
    fn dimensions(&self) -> (u32, u32);
}

/// Connects capture streams by configured stream name
pub trait CaptureSource: Send + Sync {
    fn connect(&self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>>;
}

fn timestamp_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |ns| ns.max(0) as u64)
}

// ---------------------------------------------------------------------------
// Channel capture
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FeedLink {
    width: u32,
    height: u32,
    rx: Receiver<Frame>,
    online: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

/// Capture source fed by test code or an external grabber
///
/// Each stream gets a [`FrameSender`]; unplugging it disconnects the
/// current capture stream and makes further connects fail until it is
/// plugged back in.
#[derive(Debug, Default)]
pub struct ChannelCaptureSource {
    feeds: Mutex<HashMap<String, FeedLink>>,
}

impl ChannelCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed for stream `name`. The feed starts plugged in.
    pub fn feed(&self, name: &str, width: u32, height: u32) -> FrameSender {
        let (tx, rx) = channel::unbounded();
        let online = Arc::new(AtomicBool::new(true));
        let generation = Arc::new(AtomicU64::new(0));

        let link = FeedLink {
            width,
            height,
            rx: rx.clone(),
            online: online.clone(),
            generation: generation.clone(),
        };
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), link);

        FrameSender {
            stream: name.to_string(),
            width,
            height,
            tx,
            rx,
            online,
            generation,
            events: None,
        }
    }
}

impl CaptureSource for ChannelCaptureSource {
    fn connect(&self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>> {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        let link = feeds.get(&config.name).ok_or_else(|| RecorderError::Capture {
            stream: config.name.clone(),
            reason: "no such feed".to_string(),
        })?;

        if !link.online.load(Ordering::Acquire) {
            return Err(RecorderError::Capture {
                stream: config.name.clone(),
                reason: "feed unplugged".to_string(),
            });
        }

        debug!("Capture connected: {}", config.name);
        Ok(Box::new(ChannelCaptureStream {
            width: link.width,
            height: link.height,
            rx: link.rx.clone(),
            online: link.online.clone(),
            generation: link.generation.clone(),
            connected_generation: link.generation.load(Ordering::Acquire),
        }))
    }
}

struct ChannelCaptureStream {
    width: u32,
    height: u32,
    rx: Receiver<Frame>,
    online: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    connected_generation: u64,
}

impl ChannelCaptureStream {
    fn is_live(&self) -> bool {
        self.online.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == self.connected_generation
    }
}

impl CaptureStream for ChannelCaptureStream {
    fn get_frame(&mut self, timeout: Duration) -> FrameRead {
        if !self.is_live() {
            return FrameRead::Disconnected;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) if self.is_live() => FrameRead::Frame(frame),
            Ok(_) => FrameRead::Disconnected,
            Err(RecvTimeoutError::Timeout) if self.is_live() => FrameRead::Timeout,
            Err(_) => FrameRead::Disconnected,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Producer handle for one [`ChannelCaptureSource`] feed
#[derive(Debug, Clone)]
pub struct FrameSender {
    stream: String,
    width: u32,
    height: u32,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    online: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    events: Option<(EventSender, String)>,
}

impl FrameSender {
    /// Also publish a frame packet on `service` for every frame sent, the
    /// way a camera daemon announces frames on the bus.
    pub fn with_events(mut self, events: EventSender, service: &str) -> Self {
        self.events = Some((events, service.to_string()));
        self
    }

    /// Send a flat grey frame with id `frame_id`.
    pub fn send(&self, frame_id: u64) -> bool {
        let sof = timestamp_nanos();
        let frame = Frame {
            frame_id,
            timestamp_sof: sof,
            timestamp_eof: sof + 1_000_000,
            width: self.width,
            height: self.height,
            data: Bytes::from(vec![128u8; yuv420_len(self.width, self.height)]),
        };
        self.send_frame(frame)
    }

    pub fn send_frame(&self, frame: Frame) -> bool {
        if !self.online.load(Ordering::Acquire) {
            return false;
        }
        if let Some((events, service)) = &self.events {
            match Event::frame(service.as_str(), &frame.packet(&self.stream)) {
                Ok(event) => {
                    events.publish(event);
                }
                Err(e) => warn!("Failed to build frame packet: {}", e),
            }
        }
        self.tx.send(frame).is_ok()
    }

    /// Simulate a camera disconnect. Frames still queued are discarded.
    pub fn unplug(&self) {
        self.online.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        let dropped = self.rx.try_iter().count();
        debug!("Feed '{}' unplugged ({} frames dropped)", self.stream, dropped);
    }

    pub fn plug(&self) {
        self.online.store(true, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Synthetic capture
// ---------------------------------------------------------------------------

/// Test-pattern generator running at each stream's configured fps
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    events: Option<EventSender>,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            events: None,
        }
    }

    /// Publish a frame packet on each stream's frame service
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }
}

impl CaptureSource for SyntheticCapture {
    fn connect(&self, config: &StreamConfig) -> Result<Box<dyn CaptureStream>> {
        let interval = Duration::from_secs(1) / config.fps.max(1);
        Ok(Box::new(SyntheticStream {
            stream: config.name.clone(),
            service: config.frame_service.clone(),
            width: self.width,
            height: self.height,
            interval,
            next_id: 1,
            next_due: Instant::now(),
            events: self.events.clone(),
        }))
    }
}

struct SyntheticStream {
    stream: String,
    service: String,
    width: u32,
    height: u32,
    interval: Duration,
    next_id: u64,
    next_due: Instant,
    events: Option<EventSender>,
}

impl SyntheticStream {
    fn pattern(&self, frame_id: u64) -> Bytes {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![128u8; yuv420_len(self.width, self.height)];
        let shift = frame_id as usize;
        for (y, row) in data[..w * h].chunks_mut(w).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + shift) & 0xff) as u8;
            }
        }
        Bytes::from(data)
    }
}

impl CaptureStream for SyntheticStream {
    fn get_frame(&mut self, timeout: Duration) -> FrameRead {
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return FrameRead::Timeout;
            }
            std::thread::sleep(wait);
        }
        self.next_due += self.interval;

        let frame_id = self.next_id;
        self.next_id += 1;
        let sof = timestamp_nanos();
        let frame = Frame {
            frame_id,
            timestamp_sof: sof,
            timestamp_eof: sof + self.interval.as_nanos() as u64 / 2,
            width: self.width,
            height: self.height,
            data: self.pattern(frame_id),
        };

        if let Some(events) = &self.events {
            match Event::frame(self.service.as_str(), &frame.packet(&self.stream)) {
                Ok(event) => {
                    events.publish(event);
                }
                Err(e) => warn!("Failed to build frame packet: {}", e),
            }
        }
        FrameRead::Frame(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
