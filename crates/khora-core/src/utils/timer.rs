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

//! Wall-clock stopwatch used for frame pacing and telemetry.

use std::time::{Duration, Instant};

/// A restartable wall-clock stopwatch.
///
/// A stopwatch is either stopped (no start instant) or running. Frame pacers
/// call [`Stopwatch::lap`] once per frame to get the time spent since the
/// previous frame and restart the measurement in one step.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    start_time: Option<Instant>,
}

impl Stopwatch {
    /// Creates a new Stopwatch that is already running.
    /// ## Returns
    /// A new instance of the Stopwatch struct.
    #[inline]
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
        }
    }

    /// Creates a stopped Stopwatch. [`Stopwatch::elapsed`] returns `None`
    /// until [`Stopwatch::start`] or [`Stopwatch::restart`] is called.
    #[inline]
    pub const fn stopped() -> Self {
        Self { start_time: None }
    }

    /// Starts the stopwatch if it is stopped. A running stopwatch keeps its
    /// original start instant.
    #[inline]
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// Restarts the measurement from now, whether or not it was running.
    #[inline]
    pub fn restart(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stops the stopwatch and returns the time measured until now.
    #[inline]
    pub fn stop(&mut self) -> Option<Duration> {
        self.start_time.take().map(|start| start.elapsed())
    }

    /// Returns `true` while the stopwatch is measuring.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Returns the time elapsed since the last (re)start and restarts the
    /// measurement. A stopped stopwatch is started and reports zero.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = self
            .start_time
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        self.start_time = Some(now);
        lap
    }

    /// Returns the elapsed time since the stopwatch was started.
    /// ## Returns
    /// An Option containing the elapsed time as a Duration, or None if the stopwatch has not been started.
    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    /// Returns the elapsed time since the stopwatch was started in milliseconds.
    /// ## Returns
    /// An Option containing the elapsed time in milliseconds as a u64, or None if the stopwatch has not been started.
    #[inline]
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed().map(|d| d.as_millis() as u64)
    }

    /// Returns the elapsed time since the stopwatch was started in seconds as f64.
    #[inline]
    pub fn elapsed_secs_f64(&self) -> Option<f64> {
        self.elapsed().map(|d| d.as_secs_f64())
    }
}
