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

// Segmented multi-camera recorder
//
// Records several camera streams into numbered, bounded-duration segments
// next to a structured log per segment:
// - One encoder thread per camera, one main thread draining the message bus
// - Token-ordered, two-phase barrier cutover between segments
// - Frame-count segment trigger with a wall-clock fallback for dead cameras
// - rlog/qlog segment logs with optional zstd/lz4 compression

pub mod bootlog;
pub mod cancel;
pub mod capture;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod protocol;
pub mod recorder;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod worker;

// Re-export main types
pub use cancel::CancellationToken;
pub use capture::{CaptureSource, CaptureStream, ChannelCaptureSource, Frame, FrameRead, SyntheticCapture};
pub use clock::{CatchUp, FrameClock, SKEW_BOUND};
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use coordinator::{Cutover, Participation, RotationCoordinator};
pub use demux::{ChannelDemuxer, Event, EventSender, EventSource};
pub use encoder::{EncodeResult, Encoder, EncoderFactory, FileEncoder, FileEncoderFactory};
pub use error::{RecorderError, Result};
pub use protocol::{CompressionLevel, CompressionType, EncodeIndex, LogRecord};
pub use recorder::Recorder;
pub use scheduler::SegmentScheduler;
pub use state::{Shared, StreamState};
pub use storage::{FilesystemLogger, LogHandle, LogWriter, LoggerOptions, Segment};
pub use worker::{EncoderWorker, WorkerContext};
