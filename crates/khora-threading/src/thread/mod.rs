// Copyright 2025 eraflo
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

//! Managed threads: the state machine, frame pacing and per-frame context.

mod frame;
mod managed;

pub use frame::FrameContext;
pub use managed::ManagedThread;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a [`ManagedThread`].
///
/// `Idle → Running ⇄ Paused → Exited`. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadState {
    /// Created, never started.
    #[default]
    Idle,
    /// Advancing frames, either detached or driven by the manager.
    Running,
    /// Suspended at a frame boundary; can be started again.
    Paused,
    /// Terminated. The thread cannot be restarted.
    Exited,
}

/// Which manager rate a thread follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadClass {
    /// The manager's main thread. Only the manager creates one.
    Main,
    /// Simulation threads, paced by the update rate.
    Update,
    /// Presentation threads, paced by the frame rate.
    Render,
}

/// What a call to [`ManagedThread::run_single_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame ran; the thread is still `Running`.
    Advanced,
    /// A pending pause was consumed; the thread is now `Paused`.
    Paused,
    /// A pending stop was consumed; the thread is now `Exited`.
    Exited,
    /// The thread was not `Running`; nothing happened.
    Inactive,
}

/// Snapshot of a thread's frame counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadStats {
    /// Name of the thread.
    pub name: String,
    /// Class of the thread.
    pub class: ThreadClass,
    /// State at the time of the snapshot.
    pub state: ThreadState,
    /// Frames advanced since creation.
    pub frames: u64,
    /// Frames whose work took longer than the target period.
    pub overruns: u64,
    /// Faults caught in frame handlers or work items.
    pub faults: u64,
    /// Work time of the last frame, excluding the pacing sleep.
    pub last_frame: Duration,
    /// Target period, `None` when unthrottled.
    pub period: Option<Duration>,
}
