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

use super::{ManagedThread, ThreadClass};
use crate::sync_context::SyncContext;
use std::time::Duration;

/// Execution handle passed to every frame handler.
///
/// Gives the handler its thread's identity, timing and synchronization
/// context without any thread-local lookup.
pub struct FrameContext<'a> {
    thread: &'a ManagedThread,
    frame: u64,
    delta: Duration,
    period: Option<Duration>,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(
        thread: &'a ManagedThread,
        frame: u64,
        delta: Duration,
        period: Option<Duration>,
    ) -> Self {
        Self {
            thread,
            frame,
            delta,
            period,
        }
    }

    /// Name of the thread running this frame.
    pub fn thread_name(&self) -> &str {
        self.thread.name()
    }

    /// Class of the thread running this frame.
    pub fn class(&self) -> ThreadClass {
        self.thread.class()
    }

    /// 1-based index of this frame.
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Time since the previous frame started, or since the thread became
    /// `Running` for the first frame after a start or resume.
    pub fn delta_time(&self) -> Duration {
        self.delta
    }

    /// Target period, `None` when unthrottled.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// The synchronization context of this thread; it is current for the
    /// whole frame.
    pub fn sync_context(&self) -> &'a SyncContext {
        self.thread.sync_context()
    }

    /// Suspends the thread at the next frame boundary.
    pub fn request_pause(&self) {
        self.thread.request_pause();
    }

    /// Exits the thread at the next frame boundary.
    pub fn request_exit(&self) {
        self.thread.request_exit();
    }
}
