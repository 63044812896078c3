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

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::state::{wait_while, Shared};

/// Default maximum lead of the encoder over the main log, in frames
pub const SKEW_BOUND: u64 = 8;

/// Outcome of [`FrameClock::wait_for_log_catch_up`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUp {
    /// The main log has seen every frame the encoder finished (or is
    /// within the skew bound and caught up).
    InSync,
    /// The gap reached the skew bound; the capture side most likely
    /// restarted, so the encoder proceeds without waiting.
    Discontinuity { producer: u64, consumer: u64 },
    Cancelled,
}

/// Producer/consumer frame-id bookkeeping for one stream
///
/// The encoder thread owns the producer side, the main thread owns the
/// consumer side. The encoder must not race arbitrarily far ahead of the
/// main log, since index records correlate encoded output with frame ids
/// the log has observed.
#[derive(Debug, Clone)]
pub struct FrameClock {
    shared: Arc<Shared>,
    stream: usize,
    skew_bound: u64,
}

impl FrameClock {
    pub fn new(shared: Arc<Shared>, stream: usize, skew_bound: u64) -> Self {
        Self {
            shared,
            stream,
            skew_bound,
        }
    }

    pub fn stream(&self) -> usize {
        self.stream
    }

    pub fn set_producer_frame(&self, frame_id: u64) {
        {
            let mut state = self.shared.lock();
            let stream = &mut state.streams[self.stream];
            stream.producer_frame_id = frame_id;
            stream.last_seen = Some(Instant::now());
        }
        self.shared.frame_cvs[self.stream].notify_all();
    }

    pub fn set_consumer_frame(&self, frame_id: u64) {
        {
            let mut state = self.shared.lock();
            let stream = &mut state.streams[self.stream];
            stream.consumer_frame_id = frame_id;
            stream.last_seen = Some(Instant::now());
        }
        self.shared.frame_cvs[self.stream].notify_all();
    }

    /// (producer, consumer)
    pub fn frame_ids(&self) -> (u64, u64) {
        let state = self.shared.lock();
        let stream = &state.streams[self.stream];
        (stream.producer_frame_id, stream.consumer_frame_id)
    }

    /// Block until the main log has caught up with the last finished frame.
    pub fn wait_for_log_catch_up(&self, cancel: &CancellationToken) -> CatchUp {
        let stream = self.stream;
        let bound = self.skew_bound;
        let guard = self.shared.lock();
        let (guard, cancelled) = wait_while(&self.shared.frame_cvs[stream], guard, cancel, |s| {
            let st = &s.streams[stream];
            st.producer_frame_id > st.consumer_frame_id
                && st.producer_frame_id - st.consumer_frame_id < bound
        });

        if cancelled {
            return CatchUp::Cancelled;
        }

        let st = &guard.streams[stream];
        if st.producer_frame_id > st.consumer_frame_id {
            let outcome = CatchUp::Discontinuity {
                producer: st.producer_frame_id,
                consumer: st.consumer_frame_id,
            };
            warn!(
                "Stream '{}' frame skew {} >= {}, treating as discontinuity",
                st.name,
                st.producer_frame_id - st.consumer_frame_id,
                bound
            );
            return outcome;
        }

        debug!(
            "Stream '{}' in sync at frame {}",
            st.name, st.producer_frame_id
        );
        CatchUp::InSync
    }

    /// Wake any thread blocked in `wait_for_log_catch_up` so it can observe
    /// cancellation.
    pub fn cancel_wait(&self) {
        let _guard = self.shared.lock();
        self.shared.frame_cvs[self.stream].notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamState;
    use std::time::Duration;

    fn clock() -> FrameClock {
        let shared = Arc::new(Shared::new(vec![StreamState::new("road", 20, true)]));
        FrameClock::new(shared, 0, SKEW_BOUND)
    }

    #[test]
    fn test_no_wait_when_log_is_ahead() {
        let clock = clock();
        clock.set_consumer_frame(5);
        clock.set_producer_frame(3);
        let cancel = CancellationToken::new();
        assert_eq!(clock.wait_for_log_catch_up(&cancel), CatchUp::InSync);
    }

    #[test]
    fn test_discontinuity_at_skew_bound() {
        let clock = clock();
        clock.set_consumer_frame(2);
        clock.set_producer_frame(2 + SKEW_BOUND);
        let cancel = CancellationToken::new();
        assert_eq!(
            clock.wait_for_log_catch_up(&cancel),
            CatchUp::Discontinuity {
                producer: 2 + SKEW_BOUND,
                consumer: 2
            }
        );
    }

    #[test]
    fn test_waits_until_consumer_catches_up() {
        let clock = clock();
        clock.set_producer_frame(4);
        clock.set_consumer_frame(1);

        let remote = clock.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.set_consumer_frame(4);
        });

        let cancel = CancellationToken::new();
        assert_eq!(clock.wait_for_log_catch_up(&cancel), CatchUp::InSync);
        assert_eq!(clock.frame_ids(), (4, 4));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_releases_waiter() {
        let clock = clock();
        clock.set_producer_frame(3);

        let cancel = CancellationToken::new();
        let remote_cancel = cancel.clone();
        let remote_clock = clock.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote_cancel.cancel();
            remote_clock.cancel_wait();
        });

        assert_eq!(clock.wait_for_log_catch_up(&cancel), CatchUp::Cancelled);
        handle.join().unwrap();
    }
}
