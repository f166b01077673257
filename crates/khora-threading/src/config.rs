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

//! Scheduler configuration, loadable from RON.

use crate::error::{Result, ThreadingError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the manager maps managed threads onto OS threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Every secondary thread runs detached on its own OS thread.
    #[default]
    MultiThread,
    /// Every thread is advanced in turn by the manager's driving thread.
    SingleThread,
}

/// Configuration of a [`ThreadManager`](crate::ThreadManager).
///
/// Missing fields take their default value, so a RON file only needs the
/// fields it overrides:
///
/// ```ron
/// (
///     execution_mode: SingleThread,
///     frames_per_second: 144.0,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial execution mode.
    pub execution_mode: ExecutionMode,
    /// Rate of update-class threads in Hz. `0.0` means unthrottled.
    pub update_per_second: f64,
    /// Rate of render-class threads in Hz. `0.0` means unthrottled.
    pub frames_per_second: f64,
    /// Rate of the main thread in Hz. When `None` the main thread follows
    /// `update_per_second`; only an explicit `Some(0.0)` leaves it unthrottled
    /// on its own.
    pub main_per_second: Option<f64>,
    /// Escalate faults from background work like thread faults.
    pub abort_on_unobserved: bool,
    /// Bound for every thread to exit during `stop`, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Bound a reporting thread waits for the main thread to take an
    /// escalated fault, in milliseconds.
    pub escalation_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::MultiThread,
            update_per_second: 60.0,
            frames_per_second: 60.0,
            main_per_second: None,
            abort_on_unobserved: false,
            shutdown_timeout_ms: 30_000,
            escalation_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    /// Parses and validates a RON document.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self =
            ron::from_str(text).map_err(|e| ThreadingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded scheduler configuration from {}", path.display());
        Self::from_ron_str(&text)
    }

    /// Serializes the configuration as pretty-printed RON.
    pub fn to_ron_string(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        ron::ser::to_string_pretty(self, pretty).map_err(|e| ThreadingError::Config(e.to_string()))
    }

    /// Checks rates and timeouts.
    pub fn validate(&self) -> Result<()> {
        validate_rate(self.update_per_second)?;
        validate_rate(self.frames_per_second)?;
        if let Some(main) = self.main_per_second {
            validate_rate(main)?;
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ThreadingError::Config(
                "shutdown_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `shutdown_timeout_ms` as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// `escalation_timeout_ms` as a [`Duration`].
    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.escalation_timeout_ms)
    }
}

pub(crate) fn validate_rate(hz: f64) -> Result<()> {
    if hz.is_finite() && hz >= 0.0 {
        Ok(())
    } else {
        Err(ThreadingError::InvalidRate(hz))
    }
}
