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

// Cross-thread bookkeeping shared by the main loop and the encoder threads.
//
// Everything lives behind one coarse mutex. Waiters park on one of the
// condvars below and re-check the cancellation token at least every
// CANCEL_POLL.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::cancel::{CancellationToken, CANCEL_POLL};
use crate::config::StreamConfig;
use crate::storage::Segment;

/// Per-stream rotation and frame-id state
#[derive(Debug, Clone)]
pub struct StreamState {
    pub name: String,
    pub enabled: bool,
    pub has_secondary_output: bool,
    pub fps: u32,

    /// Last frame id finished by the encoder thread
    pub producer_frame_id: u64,
    /// Last frame id the main log observed for this stream
    pub consumer_frame_id: u64,
    /// Logical cutover point of the most recent rotation
    pub last_rotate_frame_id: u64,

    pub initialized: bool,
    pub should_rotate: bool,

    /// Most recent frame observation from either side
    pub last_seen: Option<Instant>,
    /// Segment the stream's outputs are currently open on
    pub segment: Option<u32>,
}

impl StreamState {
    pub fn new(name: impl Into<String>, fps: u32, has_secondary_output: bool) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            has_secondary_output,
            fps,
            producer_frame_id: 0,
            consumer_frame_id: 0,
            last_rotate_frame_id: 0,
            initialized: false,
            should_rotate: false,
            last_seen: None,
            segment: None,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        let mut state = Self::new(&config.name, config.fps, config.secondary.is_some());
        state.enabled = config.enabled;
        state
    }
}

/// Barrier phase tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closing,
    Reopening,
}

impl Phase {
    fn next(self) -> Self {
        match self {
            Phase::Closing => Phase::Reopening,
            Phase::Reopening => Phase::Closing,
        }
    }
}

/// Reusable cyclic barrier alternating between close and reopen phases
///
/// The generation counter is bumped on every release, so waiters never
/// need anyone to reset `arrived` on their behalf.
#[derive(Debug)]
pub(crate) struct PhaseBarrier {
    pub phase: Phase,
    pub arrived: usize,
    pub generation: u64,
}

impl PhaseBarrier {
    fn new() -> Self {
        Self {
            phase: Phase::Closing,
            arrived: 0,
            generation: 0,
        }
    }

    /// Release the current phase if `parties` arrivals have been counted.
    pub fn try_release(&mut self, parties: usize) -> bool {
        if self.arrived > 0 && self.arrived >= parties {
            self.arrived = 0;
            self.generation += 1;
            self.phase = self.phase.next();
            true
        } else {
            false
        }
    }

    /// Drop back to the close phase with nobody waiting.
    pub fn reset(&mut self) {
        self.arrived = 0;
        self.phase = Phase::Closing;
    }
}

/// One in-flight rotation instance
#[derive(Debug, Clone)]
pub(crate) struct Round {
    pub segment: Segment,
    /// Stream indices in token order
    pub participants: Vec<usize>,
    /// Position in `participants` of the current token holder
    pub token: usize,
    /// Participants that have cleared the reopen phase
    pub finished: Vec<usize>,
}

impl Round {
    pub fn holder(&self) -> Option<usize> {
        self.participants.get(self.token).copied()
    }
}

#[derive(Debug)]
pub(crate) struct RotationState {
    /// Live encoder threads, sorted by stream index
    pub members: Vec<usize>,
    pub round: Option<Round>,
    pub barrier: PhaseBarrier,
    /// Most recently requested segment
    pub segment: Option<Segment>,
    pub completed_rounds: u64,
}

impl RotationState {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            round: None,
            barrier: PhaseBarrier::new(),
            segment: None,
            completed_rounds: 0,
        }
    }
}

#[derive(Debug)]
pub struct SharedState {
    pub streams: Vec<StreamState>,
    pub(crate) rotation: RotationState,
}

/// The coarse lock plus the condvars parked on it
#[derive(Debug)]
pub struct Shared {
    state: Mutex<SharedState>,
    pub(crate) frame_cvs: Vec<Condvar>,
    pub(crate) token_cv: Condvar,
    pub(crate) barrier_cv: Condvar,
    pub(crate) member_cv: Condvar,
}

impl Shared {
    pub fn new(streams: Vec<StreamState>) -> Self {
        let frame_cvs = streams.iter().map(|_| Condvar::new()).collect();
        Self {
            state: Mutex::new(SharedState {
                streams,
                rotation: RotationState::new(),
            }),
            frame_cvs,
            token_cv: Condvar::new(),
            barrier_cv: Condvar::new(),
            member_cv: Condvar::new(),
        }
    }

    /// Lock the shared state. A panicked encoder thread must not take the
    /// rest of the recorder down with it, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stream_count(&self) -> usize {
        self.frame_cvs.len()
    }

    /// Copy of one stream's state
    pub fn snapshot(&self, stream: usize) -> StreamState {
        self.lock().streams[stream].clone()
    }

    pub fn notify_all(&self) {
        for cv in &self.frame_cvs {
            cv.notify_all();
        }
        self.token_cv.notify_all();
        self.barrier_cv.notify_all();
        self.member_cv.notify_all();
    }
}

/// Block on `cv` while `blocked` holds, re-checking `cancel` at least every
/// CANCEL_POLL. Returns the guard and whether the wait was cancelled.
pub(crate) fn wait_while<'a, F>(
    cv: &Condvar,
    mut guard: MutexGuard<'a, SharedState>,
    cancel: &CancellationToken,
    mut blocked: F,
) -> (MutexGuard<'a, SharedState>, bool)
where
    F: FnMut(&SharedState) -> bool,
{
    while blocked(&guard) {
        if cancel.is_cancelled() {
            return (guard, true);
        }
        guard = match cv.wait_timeout(guard, CANCEL_POLL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
    (guard, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_release_alternates_phase() {
        let mut barrier = PhaseBarrier::new();
        barrier.arrived = 1;
        assert!(!barrier.try_release(2));

        barrier.arrived = 2;
        assert!(barrier.try_release(2));
        assert_eq!(barrier.phase, Phase::Reopening);
        assert_eq!(barrier.arrived, 0);
        assert_eq!(barrier.generation, 1);

        barrier.arrived = 2;
        assert!(barrier.try_release(2));
        assert_eq!(barrier.phase, Phase::Closing);
        assert_eq!(barrier.generation, 2);
    }

    #[test]
    fn test_barrier_does_not_release_empty() {
        let mut barrier = PhaseBarrier::new();
        assert!(!barrier.try_release(0));
        assert_eq!(barrier.generation, 0);
    }

    #[test]
    fn test_wait_while_cancelled() {
        let shared = Shared::new(vec![StreamState::new("road", 20, false)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let guard = shared.lock();
        let (_guard, cancelled) = wait_while(&shared.token_cv, guard, &cancel, |_| true);
        assert!(cancelled);
    }
}
