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

// Segment trigger policy
//
// While cameras are producing, a segment ends once every live stream has
// produced `segment_length * fps` frames since its last cutover. When no
// camera has been seen for the patience window the recorder falls back to
// wall-clock segments.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RecorderSettings;
use crate::coordinator::RotationCoordinator;
use crate::error::Result;
use crate::state::StreamState;
use crate::storage::{LogWriter, Segment};

/// Decides when the recorder moves on to the next segment
pub struct SegmentScheduler {
    logger: Arc<dyn LogWriter>,
    coordinator: RotationCoordinator,
    segment_length: Duration,
    patience: Duration,
    current: Option<Segment>,
    segment_start: Option<Instant>,
}

impl SegmentScheduler {
    pub fn new(
        logger: Arc<dyn LogWriter>,
        coordinator: RotationCoordinator,
        settings: &RecorderSettings,
    ) -> Self {
        Self::with_timing(
            logger,
            coordinator,
            settings.segment_length(),
            settings.camera_patience(),
        )
    }

    pub fn with_timing(
        logger: Arc<dyn LogWriter>,
        coordinator: RotationCoordinator,
        segment_length: Duration,
        patience: Duration,
    ) -> Self {
        Self {
            logger,
            coordinator,
            segment_length,
            patience,
            current: None,
            segment_start: None,
        }
    }

    pub fn current(&self) -> Option<&Segment> {
        self.current.as_ref()
    }

    /// Evaluate the trigger policy at `now`.
    pub fn should_rotate(&self, now: Instant) -> bool {
        let start = match (&self.current, self.segment_start) {
            (Some(_), Some(start)) => start,
            // The first segment always starts immediately
            _ => return true,
        };

        let frames_per_segment = |st: &StreamState| self.segment_length.as_secs() * st.fps as u64;
        let recent = |st: &StreamState| {
            st.last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) <= self.patience)
        };

        let state = self.coordinator.shared().lock();
        let mut live = state
            .streams
            .iter()
            .filter(|st| st.enabled && recent(*st))
            .peekable();

        if live.peek().is_some() {
            // Silent streams are vacuously done; a dead camera must not hold
            // back the rest
            live.all(|st| {
                st.initialized
                    && !st.should_rotate
                    && st.producer_frame_id >= st.last_rotate_frame_id + frames_per_segment(st)
            })
        } else if state.rotation.round.is_some() {
            // Previous cutover still in flight
            false
        } else {
            let elapsed = now.saturating_duration_since(start);
            let due = elapsed > self.segment_length;
            if due {
                warn!("No camera frames for {:?}, rotating on wall clock", self.patience);
            }
            due
        }
    }

    /// Start the next segment if the policy says so.
    ///
    /// A failure to allocate the segment is returned to the caller, which
    /// must stop recording.
    pub fn poll(&mut self, now: Instant) -> Result<Option<Segment>> {
        if !self.should_rotate(now) {
            return Ok(None);
        }

        let segment = self.logger.next_segment()?;
        if segment.number == 0 {
            info!("Logging to {}", segment.path.display());
        }
        warn!("Rotated to {}", segment.path.display());

        self.current = Some(segment.clone());
        self.segment_start = Some(now);
        self.coordinator.request_rotation(segment.clone());
        debug!("Segment {} started", segment.number);
        Ok(Some(segment))
    }
}
