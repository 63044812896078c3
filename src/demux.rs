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

// Message bus intake for the main thread
//
// Every event is written to the segment rlog; events carrying a frame id
// for a recorded stream advance that stream's consumer counter.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::protocol::{FramePacket, LogRecord};

/// One message received from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub service: String,
    /// Set for frame packets of a camera stream
    pub frame_id: Option<u64>,
    /// Serialized message, logged verbatim
    pub payload: Bytes,
}

impl Event {
    pub fn new(service: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            service: service.into(),
            frame_id: None,
            payload: payload.into(),
        }
    }

    /// Frame packet event for `service`
    pub fn frame(service: impl Into<String>, packet: &FramePacket) -> Result<Self> {
        let payload = LogRecord::Frame(packet.clone()).to_bytes()?;
        Ok(Self {
            service: service.into(),
            frame_id: Some(packet.frame_id),
            payload: Bytes::from(payload),
        })
    }
}

/// Source of bus events, drained by the main thread once per poll cycle
pub trait EventSource: Send {
    /// Wait up to `timeout` for events, then return everything pending.
    fn poll(&mut self, timeout: Duration) -> Vec<Event>;
}

/// Publishing side of a [`ChannelDemuxer`]
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Returns `false` once the demuxer is gone.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// In-process demuxer fed over a crossbeam channel
#[derive(Debug)]
pub struct ChannelDemuxer {
    rx: Receiver<Event>,
}

/// Create a connected sender/demuxer pair
pub fn channel() -> (EventSender, ChannelDemuxer) {
    let (tx, rx) = channel::unbounded();
    (EventSender { tx }, ChannelDemuxer { rx })
}

impl EventSource for ChannelDemuxer {
    fn poll(&mut self, timeout: Duration) -> Vec<Event> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Vec::new(),
            Err(RecvTimeoutError::Disconnected) => {
                // No publishers left; keep the poll cadence
                std::thread::sleep(timeout);
                return Vec::new();
            }
        };

        let mut events = vec![first];
        events.extend(self.rx.try_iter());
        events
    }
}

/// Decides which messages are copied into the qlog
///
/// The first message of a decimated service goes to the qlog, then every
/// N-th after it. Services without decimation never do.
#[derive(Debug, Default)]
pub struct Decimator {
    counters: HashMap<String, (u32, u32)>,
}

impl Decimator {
    pub fn from_services(services: &[ServiceConfig]) -> Self {
        let counters = services
            .iter()
            .filter_map(|s| s.decimation.map(|freq| (s.name.clone(), (0, freq.max(1)))))
            .collect();
        Self { counters }
    }

    pub fn in_qlog(&mut self, service: &str) -> bool {
        match self.counters.get_mut(service) {
            Some((counter, freq)) => {
                let selected = *counter == 0;
                *counter = (*counter + 1) % *freq;
                if selected {
                    debug!("qlog: {}", service);
                }
                selected
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_drains_pending_events() {
        let (tx, mut demux) = channel();
        for i in 0..3 {
            assert!(tx.publish(Event::new("carState", vec![i as u8])));
        }

        let events = demux.poll(Duration::from_millis(10));
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].payload, Bytes::from_static(&[2]));
        assert!(demux.poll(Duration::from_millis(5)).is_empty());
    }

    #[test]
    fn test_frame_event_carries_id() {
        let packet = FramePacket {
            stream: "road".to_string(),
            frame_id: 42,
            timestamp_sof: 1,
            timestamp_eof: 2,
        };
        let event = Event::frame("frame", &packet).unwrap();
        assert_eq!(event.frame_id, Some(42));
        assert_eq!(
            LogRecord::from_bytes(&event.payload).unwrap(),
            LogRecord::Frame(packet)
        );
    }

    #[test]
    fn test_decimation_selects_first_then_every_nth() {
        let mut decimator = Decimator::from_services(&[
            ServiceConfig {
                name: "frame".to_string(),
                decimation: Some(3),
            },
            ServiceConfig {
                name: "carState".to_string(),
                decimation: None,
            },
        ]);

        let picked: Vec<bool> = (0..7).map(|_| decimator.in_qlog("frame")).collect();
        assert_eq!(picked, vec![true, false, false, true, false, false, true]);
        assert!(!decimator.in_qlog("carState"));
        assert!(!decimator.in_qlog("unknown"));
    }
}
