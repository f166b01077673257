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

//! Error types returned by the scheduler.

use crate::fault::Fault;
use crate::thread::ThreadState;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by managed threads, synchronization contexts and the
/// thread manager.
///
/// Usage errors (`InvalidTransition`, `MainThreadImmutable`, ...) are
/// programmer bugs and are never retried. `Timeout` during shutdown is fatal.
/// `Fault` carries a frame fault the fault policy decided to raise on the
/// main thread.
#[derive(Debug, Error)]
pub enum ThreadingError {
    /// The requested operation is not legal from the thread's current state.
    #[error("cannot {operation} thread '{thread}' while it is {state:?}")]
    InvalidTransition {
        /// Name of the managed thread.
        thread: String,
        /// The rejected operation (`start`, `pause`, ...).
        operation: &'static str,
        /// The state the thread was in.
        state: ThreadState,
    },

    /// The main thread is owned by the manager and cannot be added or removed.
    #[error("the main thread is owned by the thread manager and cannot be added or removed")]
    MainThreadImmutable,

    /// `run` was called while the manager loop is already running.
    #[error("the thread manager is already running")]
    AlreadyRunning,

    /// The manager was stopped; its threads cannot be resurrected.
    #[error("the thread manager has been stopped")]
    Disposed,

    /// A thread did not reach the expected state within the bounded wait.
    #[error("thread '{thread}' did not {operation} within {timeout:?}")]
    Timeout {
        /// Name of the managed thread.
        thread: String,
        /// What was awaited (`exit`, `pause`, `start`).
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The OS refused to spawn a thread.
    #[error("failed to spawn OS thread for '{thread}'")]
    Spawn {
        /// Name of the managed thread.
        thread: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A setup hook failed while the thread was leaving `Idle`.
    #[error("setup of thread '{thread}' failed")]
    Setup {
        /// Name of the managed thread.
        thread: String,
        /// The hook's error.
        #[source]
        source: anyhow::Error,
    },

    /// The synchronization context no longer accepts work.
    #[error("synchronization context of '{context}' is closed")]
    ContextClosed {
        /// Name of the owning thread.
        context: String,
    },

    /// A rate was negative, NaN or infinite.
    #[error("invalid rate {0}: rates must be finite and >= 0")]
    InvalidRate(f64),

    /// The thread collection was mutated from inside the single-threaded sweep.
    #[error("threads cannot be added or removed from inside a single-threaded sweep; post the change to the main thread instead")]
    ReentrantMutation,

    /// A frame fault escalated to the main thread.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// The configuration could not be parsed or failed validation.
    #[error("invalid scheduler configuration: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ThreadingError>;
