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

// Segment rotation barrier protocol
//
// A rotation round runs every participating encoder thread through:
// - token-ordered external rotate calls (one thread at a time)
// - a close-phase rendezvous
// - local close/reopen of output files
// - a reopen-phase rendezvous
//
// so that no output is ever appended to segment K once any peer has moved
// on to segment K+1.

use std::sync::{Arc, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::state::{wait_while, Phase, Round, Shared, SharedState};
use crate::storage::Segment;

/// Side effects an encoder thread performs during a rotation round
pub trait Cutover {
    /// External rotate call on the primary (and secondary) encoder.
    /// Only ever invoked while holding the rotation token.
    fn rotate_encoders(&mut self, segment: &Segment) -> Result<()>;

    /// Replace the index-log handle with one for `segment`.
    fn refresh_log_handle(&mut self, segment: &Segment) -> Result<()>;

    /// Close the current output files and open the ones for `segment`.
    fn reopen_outputs(&mut self, segment: &Segment) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Participation {
    /// No rotation pending for this stream
    Idle,
    Completed(Segment),
    /// Shutdown interrupted the round; nothing was rolled back
    Cancelled,
}

/// Shared rotation state injected into every encoder worker
#[derive(Debug, Clone)]
pub struct RotationCoordinator {
    shared: Arc<Shared>,
}

impl RotationCoordinator {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Ask every enabled stream to cut over to `segment`.
    ///
    /// Called by the scheduler; never blocks beyond the shared lock.
    pub fn request_rotation(&self, segment: Segment) {
        let mut state = self.shared.lock();
        for stream in state.streams.iter_mut().filter(|s| s.enabled) {
            stream.should_rotate = true;
            stream.last_rotate_frame_id = stream.producer_frame_id;
        }
        info!("Rotation requested to segment {}", segment.number);
        state.rotation.segment = Some(segment);
        drop(state);
        self.shared.member_cv.notify_all();
    }

    /// Register `stream` as a live encoder. Waits for any in-flight round
    /// to finish first. Returns `false` if cancelled.
    pub fn join(&self, stream: usize, cancel: &CancellationToken) -> bool {
        let guard = self.shared.lock();
        let (mut guard, cancelled) = wait_while(&self.shared.member_cv, guard, cancel, |s| {
            s.rotation.round.is_some()
        });
        if cancelled {
            return false;
        }

        let members = &mut guard.rotation.members;
        if let Err(pos) = members.binary_search(&stream) {
            members.insert(pos, stream);
        }
        debug!(
            "Stream '{}' joined rotation ({} live)",
            guard.streams[stream].name,
            guard.rotation.members.len()
        );
        true
    }

    /// Remove `stream` from live membership (capture disconnect).
    ///
    /// If a round is waiting on this stream it is dropped from the round,
    /// the token skips it and any barrier it was holding up is released.
    pub fn leave(&self, stream: usize) {
        let mut guard = self.shared.lock();
        guard.rotation.members.retain(|&m| m != stream);

        let state = &mut *guard;
        let mut round_done = false;
        if let Some(round) = state.rotation.round.as_mut() {
            let unfinished = !round.finished.contains(&stream);
            if let Some(pos) = round.participants.iter().position(|&p| p == stream) {
                if unfinished {
                    round.participants.remove(pos);
                    if pos < round.token {
                        round.token -= 1;
                    }
                    if round.token >= round.participants.len() {
                        round.token = 0;
                    }
                    let parties = round.participants.len();
                    if state.rotation.barrier.try_release(parties) {
                        debug!("Barrier released after stream {} left", stream);
                    }
                    round_done = round.finished.len() >= round.participants.len();
                }
            }
        }
        if round_done {
            Self::finish_round(state);
        }

        warn!(
            "Stream '{}' left rotation ({} live)",
            guard.streams[stream].name,
            guard.rotation.members.len()
        );
        drop(guard);
        self.shared.notify_all();
    }

    /// Run the rotation protocol for `stream` if it has a rotation pending.
    ///
    /// `frame_hint` is the frame about to be processed; it bootstraps the
    /// cutover point of streams that had no prior frame history.
    pub fn participate(
        &self,
        stream: usize,
        frame_hint: Option<u64>,
        cancel: &CancellationToken,
        cutover: &mut dyn Cutover,
    ) -> Participation {
        let mut guard = self.shared.lock();
        {
            let st = &mut guard.streams[stream];
            if !st.should_rotate {
                return Participation::Idle;
            }
            if !st.initialized {
                // Without a frame the cutover point stays where the request
                // put it (the last produced frame)
                if let Some(frame_id) = frame_hint {
                    st.last_rotate_frame_id = frame_id.saturating_sub(1);
                }
                st.initialized = true;
            }
        }

        guard = match self.enter_round(guard, stream, cancel) {
            Some(guard) => guard,
            None => return Participation::Cancelled,
        };

        // Token: totally orders the external rotate calls
        let (guard, cancelled) = wait_while(&self.shared.token_cv, guard, cancel, |s| {
            s.rotation.round.as_ref().and_then(Round::holder) != Some(stream)
        });
        if cancelled {
            return Participation::Cancelled;
        }
        let segment = match guard.rotation.round.as_ref() {
            Some(round) => round.segment.clone(),
            None => return Participation::Cancelled,
        };
        let name = guard.streams[stream].name.clone();
        drop(guard);

        warn!("Stream '{}' rotating encoder to {}", name, segment.path.display());
        if let Err(e) = cutover.rotate_encoders(&segment) {
            error!("Stream '{}' encoder rotate failed: {}", name, e);
        }

        let mut guard = self.shared.lock();
        if let Some(round) = guard.rotation.round.as_mut() {
            if let Some(pos) = round.participants.iter().position(|&p| p == stream) {
                round.token = (pos + 1) % round.participants.len();
            }
        }
        drop(guard);
        self.shared.token_cv.notify_all();

        if let Err(e) = cutover.refresh_log_handle(&segment) {
            error!("Stream '{}' failed to open log handle: {}", name, e);
        }

        let guard = self.shared.lock();
        let (guard, cancelled) = self.arrive(guard, Phase::Closing, cancel);
        if cancelled {
            return Participation::Cancelled;
        }
        drop(guard);

        if let Err(e) = cutover.reopen_outputs(&segment) {
            error!("Stream '{}' failed to reopen outputs: {}", name, e);
        }

        let guard = self.shared.lock();
        let (mut guard, cancelled) = self.arrive(guard, Phase::Reopening, cancel);
        if cancelled {
            return Participation::Cancelled;
        }

        let latest = guard.rotation.segment.as_ref().map(|s| s.number);
        {
            let st = &mut guard.streams[stream];
            st.segment = Some(segment.number);
            st.should_rotate = latest != Some(segment.number);
        }

        let state = &mut *guard;
        let mut round_done = false;
        if let Some(round) = state.rotation.round.as_mut() {
            round.finished.push(stream);
            round_done = round.finished.len() >= round.participants.len();
        }
        if round_done {
            Self::finish_round(state);
        }
        drop(guard);
        self.shared.member_cv.notify_all();

        debug!("Stream '{}' finished rotation to segment {}", name, segment.number);
        Participation::Completed(segment)
    }

    /// Wake every waiter so it can observe cancellation.
    pub fn shutdown(&self) {
        let _guard = self.shared.lock();
        self.shared.notify_all();
    }

    pub fn live_count(&self) -> usize {
        self.shared.lock().rotation.members.len()
    }

    pub fn completed_rounds(&self) -> u64 {
        self.shared.lock().rotation.completed_rounds
    }

    pub fn current_segment(&self) -> Option<Segment> {
        self.shared.lock().rotation.segment.clone()
    }

    pub fn is_rotating(&self) -> bool {
        self.shared.lock().rotation.round.is_some()
    }

    /// Join the in-flight round, or start one with every live member that
    /// has a rotation pending. A stream that already finished the in-flight
    /// round waits for it to end before starting the next one.
    fn enter_round<'a>(
        &'a self,
        mut guard: MutexGuard<'a, SharedState>,
        stream: usize,
        cancel: &CancellationToken,
    ) -> Option<MutexGuard<'a, SharedState>> {
        loop {
            let in_round = guard
                .rotation
                .round
                .as_ref()
                .map(|r| Self::pending_in(r, stream));
            match in_round {
                Some(true) => return Some(guard),
                Some(false) => {
                    let (g, cancelled) =
                        wait_while(&self.shared.member_cv, guard, cancel, |s| {
                            s.rotation
                                .round
                                .as_ref()
                                .is_some_and(|r| !Self::pending_in(r, stream))
                        });
                    if cancelled {
                        return None;
                    }
                    guard = g;
                }
                None => {
                    let segment = guard.rotation.segment.clone()?;
                    let mut participants: Vec<usize> = guard
                        .rotation
                        .members
                        .iter()
                        .copied()
                        .filter(|&m| guard.streams[m].should_rotate)
                        .collect();
                    if let Err(pos) = participants.binary_search(&stream) {
                        participants.insert(pos, stream);
                    }
                    debug!(
                        "Starting rotation round to segment {} with {} participants",
                        segment.number,
                        participants.len()
                    );
                    guard.rotation.barrier.reset();
                    guard.rotation.round = Some(Round {
                        segment,
                        participants,
                        token: 0,
                        finished: Vec::new(),
                    });
                    return Some(guard);
                }
            }
        }
    }

    fn pending_in(round: &Round, stream: usize) -> bool {
        round.participants.contains(&stream) && !round.finished.contains(&stream)
    }

    /// Count this thread in at the barrier and wait for the rest of the
    /// round's participants.
    fn arrive<'a>(
        &'a self,
        mut guard: MutexGuard<'a, SharedState>,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> (MutexGuard<'a, SharedState>, bool) {
        debug_assert_eq!(guard.rotation.barrier.phase, phase);
        let parties = guard
            .rotation
            .round
            .as_ref()
            .map_or(0, |r| r.participants.len());

        let barrier = &mut guard.rotation.barrier;
        barrier.arrived += 1;
        let generation = barrier.generation;
        if barrier.try_release(parties) {
            self.shared.barrier_cv.notify_all();
            return (guard, false);
        }

        wait_while(&self.shared.barrier_cv, guard, cancel, |s| {
            s.rotation.barrier.generation == generation
        })
    }

    fn finish_round(state: &mut SharedState) {
        if let Some(round) = state.rotation.round.take() {
            state.rotation.completed_rounds += 1;
            info!(
                "Rotation to segment {} complete ({} encoders)",
                round.segment.number,
                round.finished.len()
            );
        }
        state.rotation.barrier.reset();
    }
}
