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

// Segment log storage
//
// The recorder writes one directory per segment. The main thread appends
// every observed message to the segment's rlog (and a decimated subset to
// the qlog); encoder threads append index records through shared handles.

pub mod backend;
pub mod filesystem;
pub mod sink;

pub use backend::{LogHandle, LogWriter, Segment};
pub use filesystem::{clear_locks, route_name, FilesystemLogger, LoggerOptions};
pub use sink::{read_entries, LogSink};
